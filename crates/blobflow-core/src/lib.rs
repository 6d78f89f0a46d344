//! Blobflow Core - streaming byte pipeline and row codecs
//!
//! This crate provides:
//! - The `ByteSource` / `ByteSink` streaming contract
//! - Bounded-buffer gzip compression over that contract
//! - Row encoders/decoders for csv, tsv, PostgreSQL binary and full-text documents
//! - A pipeline builder that maps format/compression strings to codec chains

pub mod batch;
pub mod byte_io;
pub mod cancel;
pub mod codec;
pub mod compression;
pub mod error;
pub mod pipeline;
pub mod types;

pub use batch::rows_to_record_batch;
pub use byte_io::{ByteSink, ByteSource, MemorySink, MemorySource, ReaderSource, WriterSink};
pub use cancel::Interrupt;
pub use codec::{decode_all, encode_all, TupleCodecType, TupleDecoder, TupleEncoder};
pub use compression::CompressionType;
pub use error::{PipelineError, Result};
pub use pipeline::{build_decoder, build_encoder, PipelinePlan};
pub use types::{Column, ColumnType, Row, TupleDescriptor, Value};
