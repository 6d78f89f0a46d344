//! Pull/push byte-stream contract shared by every pipeline stage.
//!
//! A [`ByteSource`] is read with a minimum and a maximum (the buffer length);
//! a [`ByteSink`] either takes a whole buffer or fails. Both are closed by
//! value, so a stream can only be closed once. Stages that wrap another
//! stream close it after finishing their own teardown.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::cancel::Interrupt;
use crate::error::Result;

/// Read side of a byte stream.
pub trait ByteSource {
    /// Read at least `min_read` and at most `buf.len()` bytes into `buf`.
    ///
    /// Fewer than `min_read` bytes are returned only when the stream is
    /// exhausted. A return of `0` for a non-empty buffer means end of stream.
    fn read(&mut self, buf: &mut [u8], min_read: usize) -> Result<usize>;

    /// Release the underlying resource.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Write side of a byte stream.
pub trait ByteSink {
    /// Write all of `buf` or fail.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush and release the underlying resource.
    fn close(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory streams
// ---------------------------------------------------------------------------

/// A source over an owned byte vector.
#[derive(Debug, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8], _min_read: usize) -> Result<usize> {
        let count = std::cmp::min(buf.len(), self.remaining());
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Handle to the bytes collected by a [`MemorySink`]; stays readable after
/// the sink itself has been closed.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, buf: &[u8]) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
    }
}

/// A sink that appends everything written into a [`SharedBuffer`].
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: SharedBuffer,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sink together with the handle used to inspect its output.
    pub fn shared() -> (Self, SharedBuffer) {
        let sink = Self::new();
        let handle = sink.buffer.clone();
        (sink, handle)
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }
}

impl ByteSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.buffer.append(buf);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// std::io adapters (stdin/stdout, local files)
// ---------------------------------------------------------------------------

/// A source over any [`Read`] implementation, e.g. standard input or a file.
pub struct ReaderSource<R> {
    reader: R,
    interrupt: Interrupt,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R, interrupt: Interrupt) -> Self {
        Self { reader, interrupt }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8], min_read: usize) -> Result<usize> {
        let wanted = std::cmp::min(std::cmp::max(min_read, 1), buf.len());
        let mut total = 0;

        while total < wanted {
            self.interrupt.checkpoint()?;
            match self.reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(total)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// A sink over any [`Write`] implementation, e.g. standard output or a file.
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ByteSink for WriterSink<W> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bridge into std::io for the row parsers
// ---------------------------------------------------------------------------

/// Exposes a [`ByteSource`] as [`Read`].
///
/// Each call asks the source for up to the parser-supplied buffer length with
/// no minimum, so no extra copy is buffered here.
pub struct SourceReader {
    source: Box<dyn ByteSource>,
}

impl SourceReader {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source }
    }

    pub fn into_source(self) -> Box<dyn ByteSource> {
        self.source
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf, 0).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    /// Yields at most `chunk` bytes per inner read, like a slow socket.
    struct Trickle {
        data: Vec<u8>,
        position: usize,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = [self.chunk, buf.len(), self.data.len() - self.position]
                .into_iter()
                .min()
                .unwrap_or(0);
            buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
            self.position += n;
            Ok(n)
        }
    }

    #[test]
    fn memory_source_reads_until_exhausted() {
        let mut source = MemorySource::new(b"hello world".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf, 4).unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(source.read(&mut buf, 0).unwrap(), 4);
        assert_eq!(source.read(&mut buf, 4).unwrap(), 3);
        assert_eq!(source.read(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn reader_source_honors_min_read_over_small_chunks() {
        let data: Vec<u8> = (0..=255u8).collect();
        for min in [0usize, 1, 7, 64, 200] {
            let trickle = Trickle {
                data: data.clone(),
                position: 0,
                chunk: 3,
            };
            let mut source = ReaderSource::new(trickle, Interrupt::new());
            let mut buf = vec![0u8; 200];
            let n = source.read(&mut buf, min).unwrap();
            assert!(n >= std::cmp::max(min, 1), "min={} got={}", min, n);
            assert!(n <= 200);
            assert_eq!(&buf[..n], &data[..n]);
        }
    }

    #[test]
    fn reader_source_short_read_only_at_end() {
        let trickle = Trickle {
            data: vec![9u8; 10],
            position: 0,
            chunk: 2,
        };
        let mut source = ReaderSource::new(trickle, Interrupt::new());
        let mut buf = [0u8; 32];
        assert_eq!(source.read(&mut buf, 32).unwrap(), 10);
        assert_eq!(source.read(&mut buf, 32).unwrap(), 0);
    }

    #[test]
    fn reader_source_stops_when_cancelled() {
        let interrupt = Interrupt::new();
        interrupt.cancel();
        let mut source = ReaderSource::new(io::repeat(1), interrupt);
        let mut buf = [0u8; 8];
        assert!(source.read(&mut buf, 8).unwrap_err().is_cancelled());
    }

    #[test]
    fn memory_sink_collects_writes() {
        let (mut sink, handle) = MemorySink::shared();
        sink.write(b"abc").unwrap();
        sink.write(b"def").unwrap();
        Box::new(sink).close().unwrap();
        assert_eq!(handle.contents(), b"abcdef");
    }

    #[test]
    fn source_reader_round_trips_pipeline_errors() {
        struct Failing;
        impl ByteSource for Failing {
            fn read(&mut self, _buf: &mut [u8], _min: usize) -> Result<usize> {
                Err(PipelineError::Cancelled)
            }
            fn close(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }

        let mut reader = SourceReader::new(Box::new(Failing));
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(PipelineError::from(err).is_cancelled());
    }
}
