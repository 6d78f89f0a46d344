//! Cooperative cancellation shared by every looping pipeline stage.

use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

/// Handle polled at each iteration of an unbounded loop.
///
/// Clones share the same underlying token, so cancelling any clone (or the
/// token it was built from) interrupts every stage holding one.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`PipelineError::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
