//! Row-level transfers between a blob and a caller.

use std::sync::Arc;

use blobflow_core::{decode_all, Interrupt, PipelinePlan, Result, Row, TupleDescriptor, TupleEncoder};
use tracing::info;

use crate::blob::BlobStorage;

/// Decode every row of the blob at `path` into `on_row`.
///
/// The plan is resolved before the blob is opened, so configuration errors
/// never cost a request. Returns the number of rows decoded.
pub fn get_blob<F>(
    storage: &BlobStorage,
    path: &str,
    format: &str,
    compression: &str,
    descriptor: Arc<TupleDescriptor>,
    interrupt: &Interrupt,
    on_row: F,
) -> Result<u64>
where
    F: FnMut(Row) -> Result<()>,
{
    let plan = PipelinePlan::resolve(format, compression, path, &descriptor)?;
    let source = storage.open_read(path, interrupt)?;
    let decoder = plan.decoder(Box::new(source), descriptor, interrupt)?;

    let count = decode_all(decoder, interrupt, on_row)?;
    info!("Read {} rows from '{}'", count, path);
    Ok(count)
}

/// Incremental upload of rows to one blob.
pub struct BlobWriter {
    path: String,
    encoder: Box<dyn TupleEncoder>,
    rows: u64,
    interrupt: Interrupt,
}

impl BlobWriter {
    pub fn open(
        storage: &BlobStorage,
        path: &str,
        format: &str,
        compression: &str,
        descriptor: Arc<TupleDescriptor>,
        interrupt: &Interrupt,
    ) -> Result<Self> {
        let plan = PipelinePlan::resolve(format, compression, path, &descriptor)?;
        let sink = storage.open_write(path, interrupt);
        let mut encoder = plan.encoder(Box::new(sink), descriptor, interrupt)?;
        encoder.start()?;

        Ok(Self {
            path: path.to_string(),
            encoder,
            rows: 0,
            interrupt: interrupt.clone(),
        })
    }

    pub fn push(&mut self, row: &Row) -> Result<()> {
        self.interrupt.checkpoint()?;
        self.encoder.push(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush the encoder and complete the upload. Returns the row count.
    pub fn finish(self) -> Result<u64> {
        self.encoder.finish()?;
        info!("Wrote {} rows to '{}'", self.rows, self.path);
        Ok(self.rows)
    }
}
