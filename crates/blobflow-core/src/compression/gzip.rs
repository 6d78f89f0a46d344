//! Streaming gzip compressor and decompressor.
//!
//! Both sides drive the raw deflate/inflate primitive over fixed 64 KiB
//! buffers, so memory use is bounded regardless of the payload size.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::debug;

use super::buffer::FixedBuffer;
use super::COMPRESSION_BUFFER_SIZE;
use crate::byte_io::{ByteSink, ByteSource};
use crate::cancel::Interrupt;
use crate::error::{PipelineError, Result};

const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
const WINDOW_BITS: u8 = 15;
const GZIP_MAGIC: u8 = 0x1f;

// ===========================================================================
// Compressor
// ===========================================================================

/// A [`ByteSink`] that gzips everything written to it into another sink.
pub struct GzipCompressor {
    sink: Box<dyn ByteSink>,
    deflate: Compress,
    output: FixedBuffer,
    interrupt: Interrupt,
}

impl GzipCompressor {
    pub fn new(sink: Box<dyn ByteSink>, interrupt: Interrupt) -> Self {
        Self {
            sink,
            deflate: Compress::new_gzip(Compression::new(DEFAULT_COMPRESSION_LEVEL), WINDOW_BITS),
            output: FixedBuffer::with_capacity(COMPRESSION_BUFFER_SIZE),
            interrupt,
        }
    }

    /// Feed `input` to deflate until it is consumed, or with
    /// `FlushCompress::Finish` until the stream trailer has been produced.
    fn deflate(&mut self, mut input: &[u8], flush: FlushCompress) -> Result<()> {
        let finishing = flush == FlushCompress::Finish;

        loop {
            if input.is_empty() && !finishing {
                return Ok(());
            }
            self.interrupt.checkpoint()?;

            let before_in = self.deflate.total_in();
            let before_out = self.deflate.total_out();
            let status = self
                .deflate
                .compress(input, self.output.spare_mut(), flush)
                .map_err(|e| PipelineError::Codec(format!("could not compress data: {}", e)))?;
            let consumed = (self.deflate.total_in() - before_in) as usize;
            let produced = (self.deflate.total_out() - before_out) as usize;

            input = &input[consumed..];
            self.output.commit(produced);

            if status == Status::BufError && consumed == 0 && produced == 0 {
                return Err(PipelineError::Codec(
                    "could not compress data: deflate made no progress".to_string(),
                ));
            }

            if self.output.is_full() || status == Status::StreamEnd {
                self.flush_output()?;
            }

            if status == Status::StreamEnd {
                return Ok(());
            }
        }
    }

    /// Hand buffered compressed bytes to the wrapped sink. Never issues a
    /// zero-length write.
    fn flush_output(&mut self) -> Result<()> {
        if !self.output.is_empty() {
            self.sink.write(self.output.filled())?;
            self.output.clear();
        }
        Ok(())
    }
}

impl ByteSink for GzipCompressor {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.deflate(buf, FlushCompress::None)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.deflate(&[], FlushCompress::Finish)?;
        self.flush_output()?;

        debug!(
            "gzip compressor closed: {} bytes in, {} bytes out",
            self.deflate.total_in(),
            self.deflate.total_out()
        );

        let GzipCompressor { sink, .. } = *self;
        sink.close()
    }
}

// ===========================================================================
// Decompressor
// ===========================================================================

/// Where the decompressor is within the current gzip member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberState {
    /// No bytes of the current member seen yet.
    Idle,
    /// Header seen, trailer not yet reached.
    Inflating,
    /// Trailer reached; more input starts a new member.
    Ended,
}

/// A [`ByteSource`] that inflates the bytes of another source.
///
/// Each member may use gzip or zlib framing, detected from its first byte.
/// Concatenated members are decoded back to back.
pub struct GzipDecompressor {
    source: Box<dyn ByteSource>,
    inflate: Decompress,
    input: FixedBuffer,
    output: FixedBuffer,
    end_of_input: bool,
    member: MemberState,
    bytes_in: u64,
    bytes_out: u64,
    interrupt: Interrupt,
}

impl GzipDecompressor {
    pub fn new(source: Box<dyn ByteSource>, interrupt: Interrupt) -> Self {
        Self {
            source,
            inflate: member_inflater(GZIP_MAGIC),
            input: FixedBuffer::with_capacity(COMPRESSION_BUFFER_SIZE),
            output: FixedBuffer::with_capacity(COMPRESSION_BUFFER_SIZE),
            end_of_input: false,
            member: MemberState::Idle,
            bytes_in: 0,
            bytes_out: 0,
            interrupt,
        }
    }

    /// Decompression is finished once upstream is exhausted and both buffers
    /// are empty. Running out of input inside a member is an error.
    fn is_done(&self) -> Result<bool> {
        if !(self.end_of_input && self.input.is_empty() && self.output.is_empty()) {
            return Ok(false);
        }
        if self.member == MemberState::Inflating {
            return Err(PipelineError::Codec(
                "could not uncompress data: unexpected end of compressed stream".to_string(),
            ));
        }
        Ok(true)
    }

    /// Refill the (empty) input buffer from upstream until it is full or
    /// upstream is exhausted. A zero-byte read marks exhaustion.
    fn fill_input(&mut self) -> Result<()> {
        while !self.end_of_input && !self.input.is_full() {
            self.interrupt.checkpoint()?;

            let count = self.source.read(self.input.spare_mut(), 0)?;
            if count == 0 {
                self.end_of_input = true;
            } else {
                self.input.commit(count);
                self.bytes_in += count as u64;
            }
        }
        Ok(())
    }

    /// Run one inflate call from the input buffer into the (empty) output
    /// buffer.
    fn inflate_step(&mut self) -> Result<()> {
        if self.input.is_empty() {
            return Ok(());
        }
        debug_assert!(self.output.is_empty());

        if self.member != MemberState::Inflating {
            self.inflate = member_inflater(self.input.filled()[0]);
            self.member = MemberState::Idle;
        }

        let before_in = self.inflate.total_in();
        let before_out = self.inflate.total_out();
        let status = self
            .inflate
            .decompress(self.input.filled(), self.output.spare_mut(), FlushDecompress::None)
            .map_err(|e| PipelineError::Codec(format!("could not uncompress data: {}", e)))?;
        let consumed = (self.inflate.total_in() - before_in) as usize;
        let produced = (self.inflate.total_out() - before_out) as usize;

        self.input.consume(consumed);
        self.output.commit(produced);
        self.bytes_out += produced as u64;

        self.member = match status {
            Status::StreamEnd => MemberState::Ended,
            Status::Ok => MemberState::Inflating,
            Status::BufError if consumed == 0 && produced == 0 => {
                return Err(PipelineError::Codec(
                    "could not uncompress data: inflate made no progress".to_string(),
                ));
            }
            Status::BufError => MemberState::Inflating,
        };

        Ok(())
    }
}

fn member_inflater(first_byte: u8) -> Decompress {
    if first_byte == GZIP_MAGIC {
        Decompress::new_gzip(WINDOW_BITS)
    } else {
        Decompress::new(true)
    }
}

impl ByteSource for GzipDecompressor {
    fn read(&mut self, buf: &mut [u8], min_read: usize) -> Result<usize> {
        let mut total = 0;

        loop {
            total += self.output.drain_into(&mut buf[total..]);
            if total == buf.len() || (total > 0 && total >= min_read) {
                break;
            }

            // output buffer is fully drained at this point
            self.interrupt.checkpoint()?;

            if self.input.is_empty() && !self.end_of_input {
                self.fill_input()?;
            }

            if self.is_done()? {
                break;
            }

            self.inflate_step()?;
        }

        Ok(total)
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!(
            "gzip decompressor closed: {} bytes in, {} bytes out",
            self.bytes_in, self.bytes_out
        );

        let GzipDecompressor { source, .. } = *self;
        source.close()
    }
}
