//! Retry loop around an arbitrary async operation

use super::backoff::Backoff;
use super::policy::RetryPolicy;
use crate::cancel::Cancellation;
use crate::error::{ErrorKind, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One attempt inside a single retry run
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    /// 0-based attempt number
    pub attempt_index: u32,
    /// When the attempt started
    pub started_at: Instant,
    /// Classification of the failure, if it failed
    pub error: Option<ErrorKind>,
}

impl RequestAttempt {
    fn start(attempt_index: u32) -> Self {
        Self {
            attempt_index,
            started_at: Instant::now(),
            error: None,
        }
    }

    /// Time spent in the attempt so far
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Executes operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryHandler {
    policy: Arc<RetryPolicy>,
    backoff: Arc<Backoff>,
}

impl RetryHandler {
    /// Create a handler with OS-seeded jitter
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = Backoff::from_policy(&policy);
        Self::with_backoff(policy, backoff)
    }

    /// Create a handler with an explicit backoff (e.g. a seeded one)
    pub fn with_backoff(policy: RetryPolicy, backoff: Backoff) -> Self {
        Self {
            policy: Arc::new(policy),
            backoff: Arc::new(backoff),
        }
    }

    /// The policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally or retries run out
    ///
    /// Makes at most `max_retries + 1` calls. The last error is returned
    /// unchanged. A rate-limit error's `retry_after` hint replaces the
    /// computed backoff. Cancellation interrupts both the operation and the
    /// sleep and yields [`crate::Error::Cancelled`].
    pub async fn execute<T, F, Fut>(&self, cancel: &Cancellation, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.policy.max_retries();
        let mut attempt = 0;

        loop {
            let mut record = RequestAttempt::start(attempt);
            let err = match cancel.run(operation()).await.and_then(|outcome| outcome) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            record.error = Some(err.kind());

            if !self.policy.is_retryable(&err) {
                debug!(?record, "not retrying: {err}");
                return Err(err);
            }

            if attempt >= max_retries {
                debug!(
                    attempts = attempt + 1,
                    kind = %err.kind(),
                    "giving up after {} attempt(s): {err}",
                    attempt + 1
                );
                return Err(err);
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.backoff.delay(attempt));
            warn!(
                "Attempt {}/{} failed ({}), retrying in {:?}: {err}",
                attempt + 1,
                max_retries + 1,
                err.kind(),
                delay
            );
            cancel.sleep(delay).await?;
            attempt += 1;
        }
    }
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Shorthand for a one-off retry run
pub async fn execute_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &Cancellation,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryHandler::new(policy).execute(cancel, operation).await
}
