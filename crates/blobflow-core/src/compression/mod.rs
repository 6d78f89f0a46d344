//! Transparent stream compression.
//!
//! [`build_compressor`] and [`build_decompressor`] wrap a sink or source in
//! the selected codec. [`CompressionType::None`] hands the stream back as is.

#[cfg(feature = "gzip")]
mod buffer;
#[cfg(feature = "gzip")]
pub mod gzip;

use std::fmt;
use std::str::FromStr;

use crate::byte_io::{ByteSink, ByteSource};
use crate::cancel::Interrupt;
use crate::error::{PipelineError, Result};

/// Size of the fixed input and output buffers used by the gzip codec.
pub const COMPRESSION_BUFFER_SIZE: usize = 64 * 1024;

/// Supported stream compressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Gzip,
    None,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::Gzip => "gzip",
            CompressionType::None => "none",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => {
                if cfg!(feature = "gzip") {
                    Ok(CompressionType::Gzip)
                } else {
                    Err(PipelineError::Config(
                        "gzip compression requires blobflow to be built with the gzip feature"
                            .to_string(),
                    ))
                }
            }
            "none" => Ok(CompressionType::None),
            other => Err(PipelineError::Config(format!(
                "invalid compression algorithm: {}",
                other
            ))),
        }
    }
}

/// Wrap `sink` so that bytes written to it are compressed.
pub fn build_compressor(
    compression: CompressionType,
    sink: Box<dyn ByteSink>,
    interrupt: &Interrupt,
) -> Result<Box<dyn ByteSink>> {
    match compression {
        #[cfg(feature = "gzip")]
        CompressionType::Gzip => Ok(Box::new(gzip::GzipCompressor::new(sink, interrupt.clone()))),
        #[cfg(not(feature = "gzip"))]
        CompressionType::Gzip => {
            let _ = (sink, interrupt);
            Err(PipelineError::Config(
                "gzip compression requires blobflow to be built with the gzip feature".to_string(),
            ))
        }
        CompressionType::None => Ok(sink),
    }
}

/// Wrap `source` so that bytes read from it are decompressed.
pub fn build_decompressor(
    compression: CompressionType,
    source: Box<dyn ByteSource>,
    interrupt: &Interrupt,
) -> Result<Box<dyn ByteSource>> {
    match compression {
        #[cfg(feature = "gzip")]
        CompressionType::Gzip => Ok(Box::new(gzip::GzipDecompressor::new(
            source,
            interrupt.clone(),
        ))),
        #[cfg(not(feature = "gzip"))]
        CompressionType::Gzip => {
            let _ = (source, interrupt);
            Err(PipelineError::Config(
                "gzip compression requires blobflow to be built with the gzip feature".to_string(),
            ))
        }
        CompressionType::None => Ok(source),
    }
}
