//! CLI configuration from environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use blobflow_core::pipeline::AUTO;
use blobflow_core::{CompressionType, TupleCodecType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// JSON file holding named storage accounts.
    pub accounts_file: PathBuf,
    /// Row format used when `--format` is not given.
    pub default_format: String,
    /// Compression used when `--compression` is not given.
    pub default_compression: String,
}

impl CliConfig {
    pub fn from_env() -> Result<Self> {
        let default_format =
            std::env::var("BLOBFLOW_DEFAULT_FORMAT").unwrap_or_else(|_| AUTO.to_string());
        if default_format != AUTO {
            TupleCodecType::from_format(&default_format)
                .context("Invalid BLOBFLOW_DEFAULT_FORMAT")?;
        }

        let default_compression =
            std::env::var("BLOBFLOW_DEFAULT_COMPRESSION").unwrap_or_else(|_| AUTO.to_string());
        if default_compression != AUTO {
            default_compression
                .parse::<CompressionType>()
                .context("Invalid BLOBFLOW_DEFAULT_COMPRESSION")?;
        }

        Ok(Self {
            accounts_file: std::env::var("BLOBFLOW_ACCOUNTS_FILE")
                .unwrap_or_else(|_| "./blobflow-accounts.json".to_string())
                .into(),
            default_format,
            default_compression,
        })
    }
}
