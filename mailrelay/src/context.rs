//! Per-request cancellation and deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a [`RequestContext::sleep`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full delay passed.
    Elapsed,
    /// The process is shutting down.
    Cancelled,
    /// The request's deadline passed first.
    DeadlineExceeded,
}

/// Scope of one request: a child of the process-wide shutdown token plus an
/// absolute deadline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestContext {
    /// Derive a context from `parent` that expires `timeout` from now.
    #[must_use]
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Wait for `delay` unless the request is cancelled or its deadline
    /// passes first. Cancellation wins over an expired deadline, which wins
    /// over an elapsed delay.
    pub async fn sleep(&self, delay: Duration) -> Wake {
        tokio::select! {
            biased;

            () = self.token.cancelled() => Wake::Cancelled,
            () = tokio::time::sleep_until(self.deadline) => Wake::DeadlineExceeded,
            () = tokio::time::sleep(delay) => Wake::Elapsed,
        }
    }
}
