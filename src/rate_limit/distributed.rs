//! Token bucket shared across processes through a [`BucketStore`]

use super::local::WAKE_EPSILON;
use super::store::BucketStore;
use super::types::{eta_from_decision, BucketConfig, BucketDecision, RateLimiter};
use crate::cancel::Cancellation;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Default key namespace
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// Default sliding expiry of an idle bucket
pub const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(3600);

/// Rate limiter whose bucket lives in a shared store
///
/// One bucket per (provider, source) pair. Capacity and refill rate are fixed
/// at construction.
#[derive(Debug, Clone)]
pub struct DistributedRateLimiter {
    store: Arc<dyn BucketStore>,
    provider: String,
    source: String,
    key: String,
    config: BucketConfig,
    ttl: Duration,
}

impl DistributedRateLimiter {
    /// Create a limiter for `provider`/`source` backed by `store`
    pub fn new(
        store: Arc<dyn BucketStore>,
        provider: &str,
        source: &str,
        config: BucketConfig,
    ) -> Self {
        Self {
            store,
            provider: provider.to_string(),
            source: source.to_string(),
            key: bucket_key(DEFAULT_KEY_PREFIX, provider, source),
            config,
            ttl: DEFAULT_BUCKET_TTL,
        }
    }

    /// Use a different key namespace
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key = bucket_key(prefix, &self.provider, &self.source);
        self
    }

    /// Use a different idle expiry (Redis keeps whole seconds, minimum one)
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The store key of this limiter's bucket
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bucket shape
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    async fn take(&self, consume: bool) -> Result<BucketDecision> {
        self.store
            .take(&self.key, &self.config, self.ttl, consume)
            .await
    }
}

/// `prefix:provider:source`
pub fn bucket_key(prefix: &str, provider: &str, source: &str) -> String {
    format!("{prefix}:{provider}:{source}")
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn check(&self) -> Result<bool> {
        Ok(self.take(false).await?.allowed)
    }

    async fn acquire(&self, cancel: &Cancellation) -> Result<()> {
        loop {
            let decision = cancel.run(self.take(true)).await??;
            if decision.allowed {
                return Ok(());
            }
            trace!(key = %self.key, wait = ?decision.wait, "shared bucket empty");
            cancel.sleep(decision.wait.saturating_add(WAKE_EPSILON)).await?;
        }
    }

    async fn remaining(&self) -> Result<u64> {
        Ok(self.take(false).await?.remaining.max(0.0).floor() as u64)
    }

    async fn reset_eta(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(eta_from_decision(&self.take(false).await?))
    }
}
