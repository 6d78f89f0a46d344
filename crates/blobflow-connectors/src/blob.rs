//! Blob byte streams over an `object_store` backend.
//!
//! The pipeline is synchronous, so each [`BlobStorage`] owns a
//! current-thread tokio runtime and blocks on the store's futures.

use std::sync::Arc;

use blobflow_core::{ByteSink, ByteSource, Interrupt, PipelineError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, GetOptions, ObjectMeta, ObjectStore};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::account::ConnectionString;
use crate::error::ConnectorError;
use crate::store::build_store;

/// Listing and HEAD attributes of one blob.
///
/// Listings only carry what every backend reports per entry: name, size,
/// last modification time and etag. The content headers are filled by
/// [`BlobStorage::stat_blob`] when the backend returns them. `content_md5`
/// is not exposed by the object store API and stays `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobMetadata {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_md5: Option<String>,
}

impl From<ObjectMeta> for BlobMetadata {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            name: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
            etag: meta.e_tag,
            content_type: None,
            content_encoding: None,
            content_language: None,
            content_md5: None,
        }
    }
}

/// A container in one storage account.
pub struct BlobStorage {
    store: Arc<dyn ObjectStore>,
    container: String,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for BlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStorage")
            .field("store", &self.store.to_string())
            .field("container", &self.container)
            .finish()
    }
}

impl BlobStorage {
    pub fn connect(connection_string: &str, container: &str) -> std::result::Result<Self, ConnectorError> {
        let connection = ConnectionString::parse(connection_string)?;
        let store = build_store(&connection, container)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to start runtime: {}", e)))?;

        info!("Connected to {} container '{}'", connection.kind(), container);
        Ok(Self {
            store,
            container: container.to_string(),
            runtime: Arc::new(runtime),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Open a blob for streaming reads.
    pub fn open_read(&self, path: &str, interrupt: &Interrupt) -> std::result::Result<BlobSource, ConnectorError> {
        let location = ObjectPath::from(path);
        let result = self.runtime.block_on(self.store.get(&location))?;
        debug!("Opened '{}' for reading ({} bytes)", path, result.meta.size);

        Ok(BlobSource {
            path: path.to_string(),
            runtime: self.runtime.clone(),
            stream: result.into_stream(),
            chunk: Bytes::new(),
            exhausted: false,
            bytes_read: 0,
            interrupt: interrupt.clone(),
        })
    }

    /// Open a blob for streaming writes. The blob becomes visible when the
    /// sink is closed.
    pub fn open_write(&self, path: &str, interrupt: &Interrupt) -> BlobSink {
        debug!("Opened '{}' for writing", path);
        BlobSink {
            path: path.to_string(),
            runtime: self.runtime.clone(),
            writer: BufWriter::new(self.store.clone(), ObjectPath::from(path)),
            bytes_written: 0,
            interrupt: interrupt.clone(),
        }
    }

    /// Call `callback` for every blob whose name starts with `prefix`.
    /// Returns the number of blobs listed.
    ///
    /// Entries have no content headers; use [`Self::stat_blob`] for those.
    pub fn list_blobs<F>(&self, prefix: &str, interrupt: &Interrupt, mut callback: F) -> Result<u64>
    where
        F: FnMut(BlobMetadata) -> Result<()>,
    {
        // object_store lists whole path segments; list the enclosing
        // directory and filter on the raw string prefix.
        let parent = prefix.rsplit_once('/').map(|(dir, _)| ObjectPath::from(dir));
        let mut stream = self.store.list(parent.as_ref());

        let mut count = 0u64;
        loop {
            interrupt.checkpoint()?;
            let meta = match self.runtime.block_on(stream.next()) {
                Some(meta) => meta.map_err(ConnectorError::from)?,
                None => break,
            };
            if !meta.location.as_ref().starts_with(prefix) {
                continue;
            }
            callback(BlobMetadata::from(meta))?;
            count += 1;
        }

        info!("Listed {} blobs with prefix '{}' in '{}'", count, prefix, self.container);
        Ok(count)
    }

    /// Fetch the metadata of a single blob.
    pub fn stat_blob(&self, path: &str) -> std::result::Result<BlobMetadata, ConnectorError> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .runtime
            .block_on(self.store.get_opts(&ObjectPath::from(path), options))?;

        let attribute = |key: &Attribute| result.attributes.get(key).map(|v| v.as_ref().to_string());
        let content_type = attribute(&Attribute::ContentType);
        let content_encoding = attribute(&Attribute::ContentEncoding);
        let content_language = attribute(&Attribute::ContentLanguage);

        let mut metadata = BlobMetadata::from(result.meta);
        metadata.content_type = content_type;
        metadata.content_encoding = content_encoding;
        metadata.content_language = content_language;
        Ok(metadata)
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Read side of a blob: pulls the object's body chunk by chunk.
pub struct BlobSource {
    path: String,
    runtime: Arc<Runtime>,
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    chunk: Bytes,
    exhausted: bool,
    bytes_read: u64,
    interrupt: Interrupt,
}

impl ByteSource for BlobSource {
    fn read(&mut self, buf: &mut [u8], min_read: usize) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            if !self.chunk.is_empty() {
                let n = self.chunk.len().min(buf.len() - total);
                buf[total..total + n].copy_from_slice(&self.chunk[..n]);
                self.chunk = self.chunk.slice(n..);
                total += n;
                continue;
            }
            if self.exhausted || (total > 0 && total >= min_read) {
                break;
            }

            self.interrupt.checkpoint()?;
            match self.runtime.block_on(self.stream.next()) {
                Some(chunk) => self.chunk = chunk.map_err(ConnectorError::from)?,
                None => self.exhausted = true,
            }
        }

        self.bytes_read += total as u64;
        Ok(total)
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("Closed '{}' after reading {} bytes", self.path, self.bytes_read);
        Ok(())
    }
}

/// Write side of a blob: a buffered multipart upload completed on close.
pub struct BlobSink {
    path: String,
    runtime: Arc<Runtime>,
    writer: BufWriter,
    bytes_written: u64,
    interrupt: Interrupt,
}

impl ByteSink for BlobSink {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.interrupt.checkpoint()?;
        self.runtime
            .block_on(self.writer.write_all(buf))
            .map_err(|e| PipelineError::Transport(format!("write to '{}' failed: {}", self.path, e)))?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.runtime
            .block_on(self.writer.shutdown())
            .map_err(|e| PipelineError::Transport(format!("upload of '{}' failed: {}", self.path, e)))?;
        info!("Uploaded '{}' ({} bytes)", self.path, self.bytes_written);
        Ok(())
    }
}
