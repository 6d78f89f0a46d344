//! Blobflow Connectors - object-store byte streams
//!
//! This crate provides:
//! - Connection-string parsing (Azure, S3, local directories, in-memory)
//! - The named storage-account catalog
//! - Blob read/write streams and listings over `object_store`
//! - Row-level get/put transfers built on the core pipeline

pub mod account;
pub mod blob;
pub mod error;
pub mod s3;
pub mod store;
pub mod transfer;

pub use account::{AccountCatalog, AzureConfig, ConnectionString};
pub use blob::{BlobMetadata, BlobSink, BlobSource, BlobStorage};
pub use error::ConnectorError;
pub use s3::S3Config;
pub use store::build_store;
pub use transfer::{get_blob, BlobWriter};
