//! Per-request call context: deadline plus cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, LlmResult};

/// Threaded through every external call made on behalf of one message.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// No deadline, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// A context sharing this deadline whose cancellation also follows the
    /// parent's.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Refuse to start new work when cancelled or when less than `floor`
    /// remains before the deadline.
    pub fn ensure_can_start(&self, floor: Duration) -> LlmResult<()> {
        if self.is_cancelled() {
            return Err(LlmError::Canceled);
        }
        match self.remaining() {
            Some(left) if left < floor => Err(LlmError::DeadlineExceeded {
                remaining_ms: u64::try_from(left.as_millis()).unwrap_or(u64::MAX),
            }),
            _ => Ok(()),
        }
    }

    /// Sleep for `delay`, returning early with `Canceled` on cancellation.
    pub async fn sleep(&self, delay: Duration) -> LlmResult<()> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.cancel.cancelled() => Err(LlmError::Canceled),
        }
    }
}
