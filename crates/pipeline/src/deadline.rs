//! The shared time budget of one pipeline run.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voxchat_core::error::{PipelineError, Stage};

/// A deadline plus the caller's cancellation token.
///
/// Either one firing ends the run with [`PipelineError::Timeout`] tagged
/// with the stage that was in flight.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            cancel,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.expires_at
    }

    /// Fail fast if the budget is already spent.
    pub fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_expired() {
            Err(PipelineError::Timeout { stage })
        } else {
            Ok(())
        }
    }

    /// Race `fut` against the deadline. The future is dropped when the
    /// deadline wins.
    pub async fn run<F, T>(&self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = T>,
    {
        self.check(stage)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Timeout { stage }),
            _ = tokio::time::sleep_until(self.expires_at) => Err(PipelineError::Timeout { stage }),
            out = fut => Ok(out),
        }
    }
}
