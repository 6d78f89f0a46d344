//! Tuple encoders and decoders.
//!
//! An encoder turns rows into bytes written to a [`ByteSink`]; a decoder
//! turns bytes pulled from a [`ByteSource`] into rows. Both follow the
//! same lifecycle: `start`, then any number of `push` / `next`, then
//! `finish`, which closes the underlying stream.

pub mod binary;
pub mod delimited;
pub mod full_text;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::byte_io::{ByteSink, ByteSource};
use crate::cancel::Interrupt;
use crate::error::{PipelineError, Result};
use crate::types::{Row, TupleDescriptor};

pub use binary::{BinaryDecoder, BinaryEncoder};
pub use delimited::{DelimitedDecoder, DelimitedEncoder, Dialect};
pub use full_text::{FullTextDecoder, FullTextEncoder};

/// Families of row formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleCodecType {
    /// Comma-separated, double-quoted text.
    Csv,
    /// Tab-separated PostgreSQL text format.
    Tsv,
    /// PostgreSQL binary `COPY` layout.
    Binary,
    /// The whole stream is one value of a single-column tuple.
    FullText,
}

impl TupleCodecType {
    /// Map a format string to its codec family.
    pub fn from_format(format: &str) -> Result<Self> {
        match format {
            "csv" => Ok(TupleCodecType::Csv),
            "tsv" | "text" => Ok(TupleCodecType::Tsv),
            "binary" => Ok(TupleCodecType::Binary),
            "json" | "xml" => Ok(TupleCodecType::FullText),
            other => Err(PipelineError::Config(format!("invalid format: {}", other))),
        }
    }

    /// Fail unless this codec can carry tuples of `descriptor`.
    pub fn check_descriptor(&self, descriptor: &TupleDescriptor) -> Result<()> {
        if *self == TupleCodecType::FullText && descriptor.column_count() != 1 {
            return Err(PipelineError::Config(format!(
                "can only use a full-text format with a single column, got {} columns",
                descriptor.column_count()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TupleCodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TupleCodecType::Csv => "csv",
            TupleCodecType::Tsv => "tsv",
            TupleCodecType::Binary => "binary",
            TupleCodecType::FullText => "full-text",
        };
        f.write_str(name)
    }
}

/// Writes rows to a byte sink. Owns the sink until `finish` closes it.
pub trait TupleEncoder {
    /// Write any header the format needs.
    fn start(&mut self) -> Result<()>;

    /// Append the encoding of one row.
    fn push(&mut self, row: &Row) -> Result<()>;

    /// Flush remaining state and close the sink.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Reads rows from a byte source. Owns the source until `finish` closes it.
pub trait TupleDecoder {
    /// Initialize the parser against the source.
    fn start(&mut self) -> Result<()>;

    /// Produce the next row, or `None` once the input is exhausted.
    /// `None` is terminal.
    fn next(&mut self) -> Result<Option<Row>>;

    /// Release parser state and close the source.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Build the encoder for `codec`, writing to `sink`.
pub fn build_tuple_encoder(
    codec: TupleCodecType,
    descriptor: Arc<TupleDescriptor>,
    sink: Box<dyn ByteSink>,
) -> Result<Box<dyn TupleEncoder>> {
    codec.check_descriptor(&descriptor)?;

    let encoder: Box<dyn TupleEncoder> = match codec {
        TupleCodecType::Csv => Box::new(DelimitedEncoder::new(Dialect::Csv, descriptor, sink)),
        TupleCodecType::Tsv => Box::new(DelimitedEncoder::new(Dialect::Tsv, descriptor, sink)),
        TupleCodecType::Binary => Box::new(BinaryEncoder::new(descriptor, sink)),
        TupleCodecType::FullText => Box::new(FullTextEncoder::new(descriptor, sink)?),
    };
    Ok(encoder)
}

/// Build the decoder for `codec`, reading from `source`.
pub fn build_tuple_decoder(
    codec: TupleCodecType,
    descriptor: Arc<TupleDescriptor>,
    source: Box<dyn ByteSource>,
    interrupt: &Interrupt,
) -> Result<Box<dyn TupleDecoder>> {
    codec.check_descriptor(&descriptor)?;

    let decoder: Box<dyn TupleDecoder> = match codec {
        TupleCodecType::Csv => Box::new(DelimitedDecoder::new(Dialect::Csv, descriptor, source)),
        TupleCodecType::Tsv => Box::new(DelimitedDecoder::new(Dialect::Tsv, descriptor, source)),
        TupleCodecType::Binary => Box::new(BinaryDecoder::new(descriptor, source)),
        TupleCodecType::FullText => Box::new(FullTextDecoder::new(
            descriptor,
            source,
            interrupt.clone(),
        )?),
    };
    Ok(decoder)
}

/// Run a decoder to completion, handing each row to `on_row`.
/// Returns the number of rows decoded.
pub fn decode_all<F>(
    mut decoder: Box<dyn TupleDecoder>,
    interrupt: &Interrupt,
    mut on_row: F,
) -> Result<u64>
where
    F: FnMut(Row) -> Result<()>,
{
    decoder.start()?;

    let mut count = 0u64;
    while let Some(row) = decoder.next()? {
        on_row(row)?;
        count += 1;
        interrupt.checkpoint()?;
    }

    decoder.finish()?;
    debug!("decoded {} rows", count);
    Ok(count)
}

/// Run an encoder over `rows` and finish it. Returns the number of rows
/// encoded.
pub fn encode_all<'a, I>(
    mut encoder: Box<dyn TupleEncoder>,
    rows: I,
    interrupt: &Interrupt,
) -> Result<u64>
where
    I: IntoIterator<Item = &'a Row>,
{
    encoder.start()?;

    let mut count = 0u64;
    for row in rows {
        interrupt.checkpoint()?;
        encoder.push(row)?;
        count += 1;
    }

    encoder.finish()?;
    debug!("encoded {} rows", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_io::{MemorySink, MemorySource};
    use crate::types::Value;

    #[test]
    fn format_strings_map_to_codecs() {
        assert_eq!(TupleCodecType::from_format("csv").unwrap(), TupleCodecType::Csv);
        assert_eq!(TupleCodecType::from_format("tsv").unwrap(), TupleCodecType::Tsv);
        assert_eq!(TupleCodecType::from_format("text").unwrap(), TupleCodecType::Tsv);
        assert_eq!(TupleCodecType::from_format("binary").unwrap(), TupleCodecType::Binary);
        assert_eq!(TupleCodecType::from_format("json").unwrap(), TupleCodecType::FullText);
        assert_eq!(TupleCodecType::from_format("xml").unwrap(), TupleCodecType::FullText);
    }

    #[test]
    fn unknown_format_is_config_error() {
        for format in ["parquet", "CSV", "", "auto"] {
            assert!(matches!(
                TupleCodecType::from_format(format),
                Err(PipelineError::Config(_))
            ));
        }
    }

    #[test]
    fn full_text_rejects_multi_column_descriptor() {
        let descriptor = TupleDescriptor::parse("a:text,b:text").unwrap();
        let result = build_tuple_decoder(
            TupleCodecType::FullText,
            descriptor.clone(),
            Box::new(MemorySource::new("x")),
            &Interrupt::new(),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));

        let result = build_tuple_encoder(
            TupleCodecType::FullText,
            descriptor,
            Box::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn decode_all_stops_on_cancellation() {
        let descriptor = TupleDescriptor::parse("n:int4").unwrap();
        let decoder = build_tuple_decoder(
            TupleCodecType::Csv,
            descriptor,
            Box::new(MemorySource::new("1\n2\n3\n4\n")),
            &Interrupt::new(),
        )
        .unwrap();

        let interrupt = Interrupt::new();
        let mut seen = Vec::new();
        let err = decode_all(decoder, &interrupt, |row| {
            seen.push(row);
            if seen.len() == 2 {
                interrupt.cancel();
            }
            Ok(())
        })
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].get(0), Some(&Value::Int32(2)));
    }
}
