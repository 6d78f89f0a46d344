//! Turn configuration strings into assembled codec chains.
//!
//! A [`PipelinePlan`] is resolved first, so every configuration error is
//! raised before a byte stream is touched. The plan then wraps a source or
//! sink in the selected compression and row codec.

use std::sync::Arc;

use tracing::{debug, info};

use crate::byte_io::{ByteSink, ByteSource};
use crate::cancel::Interrupt;
use crate::codec::{build_tuple_decoder, build_tuple_encoder, TupleCodecType, TupleDecoder, TupleEncoder};
use crate::compression::{build_compressor, build_decompressor, CompressionType};
use crate::error::Result;
use crate::types::TupleDescriptor;

pub const AUTO: &str = "auto";
const GZIP_SUFFIX: &str = ".gz";

/// Infer a format string from a file name. `.gz` is ignored; anything
/// unrecognized is `csv`.
pub fn format_from_path(path: &str) -> &'static str {
    let path = path.strip_suffix(GZIP_SUFFIX).unwrap_or(path);

    if path.ends_with(".csv") {
        "csv"
    } else if path.ends_with(".tsv") {
        "tsv"
    } else if path.ends_with(".json") {
        "json"
    } else if path.ends_with(".xml") {
        "xml"
    } else {
        "csv"
    }
}

pub fn resolve_compression(setting: &str, path: &str) -> Result<CompressionType> {
    if setting == AUTO {
        if path.ends_with(GZIP_SUFFIX) {
            return "gzip".parse();
        }
        return Ok(CompressionType::None);
    }
    setting.parse()
}

pub fn resolve_format(setting: &str, path: &str) -> String {
    if setting == AUTO {
        format_from_path(path).to_string()
    } else {
        setting.to_string()
    }
}

/// Concrete codec choices for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    pub format: String,
    pub codec: TupleCodecType,
    pub compression: CompressionType,
}

impl PipelinePlan {
    pub fn resolve(
        format: &str,
        compression: &str,
        path: &str,
        descriptor: &TupleDescriptor,
    ) -> Result<Self> {
        let compression = resolve_compression(compression, path)?;
        let format = resolve_format(format, path);
        let codec = TupleCodecType::from_format(&format)?;
        codec.check_descriptor(descriptor)?;

        info!(
            "Resolved pipeline for '{}': format={} codec={} compression={}",
            path, format, codec, compression
        );
        Ok(Self {
            format,
            codec,
            compression,
        })
    }

    /// Wrap `source` as decompressor then decoder.
    pub fn decoder(
        &self,
        source: Box<dyn ByteSource>,
        descriptor: Arc<TupleDescriptor>,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn TupleDecoder>> {
        let source = build_decompressor(self.compression, source, interrupt)?;
        debug!("Attaching {} decoder", self.codec);
        build_tuple_decoder(self.codec, descriptor, source, interrupt)
    }

    /// Wrap `sink` as encoder then compressor.
    pub fn encoder(
        &self,
        sink: Box<dyn ByteSink>,
        descriptor: Arc<TupleDescriptor>,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn TupleEncoder>> {
        let sink = build_compressor(self.compression, sink, interrupt)?;
        debug!("Attaching {} encoder", self.codec);
        build_tuple_encoder(self.codec, descriptor, sink)
    }
}

/// Resolve and assemble a decoder over `source` in one step.
pub fn build_decoder(
    format: &str,
    compression: &str,
    path: &str,
    source: Box<dyn ByteSource>,
    descriptor: Arc<TupleDescriptor>,
    interrupt: &Interrupt,
) -> Result<Box<dyn TupleDecoder>> {
    PipelinePlan::resolve(format, compression, path, &descriptor)?.decoder(source, descriptor, interrupt)
}

/// Resolve and assemble an encoder over `sink` in one step.
pub fn build_encoder(
    format: &str,
    compression: &str,
    path: &str,
    sink: Box<dyn ByteSink>,
    descriptor: Arc<TupleDescriptor>,
    interrupt: &Interrupt,
) -> Result<Box<dyn TupleEncoder>> {
    PipelinePlan::resolve(format, compression, path, &descriptor)?.encoder(sink, descriptor, interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn text_column() -> Arc<TupleDescriptor> {
        TupleDescriptor::parse("v:text").unwrap()
    }

    #[test]
    fn suffix_table() {
        assert_eq!(format_from_path("a/b/data.csv"), "csv");
        assert_eq!(format_from_path("data.csv.gz"), "csv");
        assert_eq!(format_from_path("data.tsv"), "tsv");
        assert_eq!(format_from_path("data.tsv.gz"), "tsv");
        assert_eq!(format_from_path("report.json"), "json");
        assert_eq!(format_from_path("feed.xml.gz"), "xml");
        assert_eq!(format_from_path("x.unknown"), "csv");
        assert_eq!(format_from_path("noext"), "csv");
        assert_eq!(format_from_path("archive.gz"), "csv");
    }

    #[test]
    fn auto_compression_follows_gz_suffix() {
        assert_eq!(resolve_compression("auto", "data.csv").unwrap(), CompressionType::None);
        assert_eq!(resolve_compression("none", "data.csv.gz").unwrap(), CompressionType::None);
        #[cfg(feature = "gzip")]
        {
            assert_eq!(resolve_compression("auto", "data.csv.gz").unwrap(), CompressionType::Gzip);
            assert_eq!(resolve_compression("gzip", "data.csv").unwrap(), CompressionType::Gzip);
        }
        assert!(matches!(
            resolve_compression("lz4", "data.csv"),
            Err(PipelineError::Config(_))
        ));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn plan_for_gzipped_csv() {
        let plan = PipelinePlan::resolve("auto", "auto", "data.csv.gz", &text_column()).unwrap();
        assert_eq!(plan.format, "csv");
        assert_eq!(plan.codec, TupleCodecType::Csv);
        assert_eq!(plan.compression, CompressionType::Gzip);
    }

    #[test]
    fn plan_for_json_document() {
        let plan = PipelinePlan::resolve("auto", "auto", "report.json", &text_column()).unwrap();
        assert_eq!(plan.format, "json");
        assert_eq!(plan.codec, TupleCodecType::FullText);
        assert_eq!(plan.compression, CompressionType::None);
    }

    #[test]
    fn explicit_format_wins_over_suffix() {
        let plan = PipelinePlan::resolve("binary", "none", "data.csv", &text_column()).unwrap();
        assert_eq!(plan.codec, TupleCodecType::Binary);
    }

    #[test]
    fn configuration_errors_come_before_streams() {
        let two = TupleDescriptor::parse("a,b").unwrap();
        for (format, compression, path) in [
            ("yaml", "none", "x"),
            ("csv", "brotli", "x"),
            ("auto", "auto", "doc.xml"),
        ] {
            assert!(
                matches!(
                    PipelinePlan::resolve(format, compression, path, &two),
                    Err(PipelineError::Config(_))
                ),
                "{} {} {}",
                format,
                compression,
                path
            );
        }
    }
}
