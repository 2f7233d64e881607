//! In-process token bucket

use super::types::{eta_from_decision, BucketConfig, BucketDecision, RateLimiter, TokenBucketState};
use crate::cancel::Cancellation;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Added to every computed wait so a woken waiter finds the token it waited for
pub(crate) const WAKE_EPSILON: Duration = Duration::from_millis(1);

/// Token bucket held in process memory
///
/// The state is only touched under its mutex, and the mutex is never held
/// across an await.
#[derive(Debug)]
pub struct LocalRateLimiter {
    state: Mutex<TokenBucketState>,
}

impl LocalRateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(config: BucketConfig) -> Self {
        Self {
            state: Mutex::new(TokenBucketState::new(config, Instant::now())),
        }
    }

    /// Shorthand for [`BucketConfig::per_minute`]
    pub fn per_minute(requests_per_minute: u32) -> Result<Self> {
        Ok(Self::new(BucketConfig::per_minute(requests_per_minute)?))
    }

    fn take(&self, consume: bool) -> BucketDecision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.take(Instant::now(), consume)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self) -> Result<bool> {
        Ok(self.take(false).allowed)
    }

    async fn acquire(&self, cancel: &Cancellation) -> Result<()> {
        // Another waiter may grab the token we slept for, so re-evaluate after waking.
        loop {
            let decision = self.take(true);
            if decision.allowed {
                return Ok(());
            }
            trace!(wait = ?decision.wait, "local bucket empty");
            cancel.sleep(decision.wait.saturating_add(WAKE_EPSILON)).await?;
        }
    }

    async fn remaining(&self) -> Result<u64> {
        Ok(self.take(false).remaining.floor() as u64)
    }

    async fn reset_eta(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(eta_from_decision(&self.take(false)))
    }
}
