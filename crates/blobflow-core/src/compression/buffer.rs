//! Fixed-capacity byte buffer with read/write cursors.
//!
//! Bytes are appended at `end` and consumed from `start`. The backing slice
//! is allocated once and never grows; when everything has been consumed
//! both cursors rewind to zero.

pub(crate) struct FixedBuffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl FixedBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// No room left after `end`.
    pub(crate) fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    /// Bytes written but not yet consumed.
    pub(crate) fn filled(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Free space after the write cursor.
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Mark `count` bytes of the spare space as written.
    pub(crate) fn commit(&mut self, count: usize) {
        debug_assert!(self.end + count <= self.data.len());
        self.end += count;
    }

    /// Mark `count` filled bytes as consumed.
    pub(crate) fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.start += count;
        if self.start == self.end {
            self.clear();
        }
    }

    /// Copy as many filled bytes as fit into `out` and consume them.
    pub(crate) fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let count = std::cmp::min(out.len(), self.len());
        out[..count].copy_from_slice(&self.data[self.start..self.start + count]);
        self.consume(count);
        count
    }

    pub(crate) fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}
