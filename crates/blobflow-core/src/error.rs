//! Typed errors for the pipeline crate.

use std::io;

use thiserror::Error;

/// Errors raised while building or running a pipeline.
///
/// Every variant is fatal for the pipeline that raised it. Nothing in this
/// crate retries.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid format or compression setting, or a codec that cannot be
    /// used with the given tuple descriptor.
    #[error("configuration error: {0}")]
    Config(String),

    /// The deflate/inflate primitive reported a fault.
    #[error("codec error: {0}")]
    Codec(String),

    /// The byte-stream provider failed (authentication, not found, network).
    #[error("transport error: {0}")]
    Transport(String),

    /// Input bytes could not be turned into rows.
    #[error("invalid input data: {0}")]
    Data(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// I/O errors coming back through the `io::Read` / `io::Write` bridges may
/// carry a `PipelineError`; unwrap it so the original variant survives.
impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        let message = e.to_string();
        match e.into_inner() {
            Some(inner) => match inner.downcast::<PipelineError>() {
                Ok(err) => *err,
                Err(other) => PipelineError::Transport(other.to_string()),
            },
            None => PipelineError::Transport(message),
        }
    }
}

impl From<PipelineError> for io::Error {
    fn from(e: PipelineError) -> Self {
        io::Error::other(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_preserves_cancellation() {
        let io_err: io::Error = PipelineError::Cancelled.into();
        let back = PipelineError::from(io_err);
        assert!(back.is_cancelled());
    }

    #[test]
    fn plain_io_error_is_transport() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        match PipelineError::from(io_err) {
            PipelineError::Transport(msg) => assert!(msg.contains("reset by peer")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn bare_io_kind_is_transport() {
        let io_err = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            PipelineError::from(io_err),
            PipelineError::Transport(_)
        ));
    }
}
