//! Token bucket types and the rate limiter trait
//!
//! Defines the bucket arithmetic shared by every limiter and the interface
//! the request executor talks to.

use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Admission control for outbound requests
///
/// Implementations only enforce an aggregate ceiling; there is no FIFO
/// fairness between concurrent waiters.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Whether a token is available right now (does not consume)
    async fn check(&self) -> Result<bool>;

    /// Consume one token, suspending until one is available
    async fn acquire(&self, cancel: &Cancellation) -> Result<()>;

    /// Whole tokens currently available
    async fn remaining(&self) -> Result<u64>;

    /// When the next token becomes available; `None` if one is available now
    async fn reset_eta(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Bucket shape: burst capacity and steady refill rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    capacity: f64,
    refill_rate: f64,
}

impl BucketConfig {
    /// Create a bucket config; both values must be positive and finite
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(Error::config(format!(
                "bucket capacity must be > 0, got {capacity}"
            )));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(Error::config(format!(
                "bucket refill_rate must be > 0, got {refill_rate}"
            )));
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    /// Derive a bucket from requests-per-minute
    ///
    /// Refills at `rpm / 60` tokens per second and holds `2 * rpm` tokens so
    /// short bursts are allowed.
    pub fn per_minute(requests_per_minute: u32) -> Result<Self> {
        let rpm = f64::from(requests_per_minute);
        Self::new(rpm * 2.0, rpm / 60.0)
    }

    /// Maximum number of tokens
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Outcome of one atomic check-and-consume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketDecision {
    /// A token was available (and consumed, if consumption was requested)
    pub allowed: bool,
    /// Tokens left after the operation
    pub remaining: f64,
    /// How long until a token is available; zero when allowed
    pub wait: Duration,
}

/// Mutable state of one token bucket
///
/// `tokens` stays within `[0, capacity]`; it only grows through [`refill`]
/// and only shrinks through consumption in [`take`].
///
/// [`refill`]: TokenBucketState::refill
/// [`take`]: TokenBucketState::take
#[derive(Debug, Clone)]
pub struct TokenBucketState {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucketState {
    /// A full bucket
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            tokens: config.capacity,
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            last_refill: now,
        }
    }

    /// Add the tokens accrued since the last refill, saturating at capacity
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then consume one token if `consume` and one is available
    pub fn take(&mut self, now: Instant, consume: bool) -> BucketDecision {
        self.refill(now);
        if self.tokens >= 1.0 {
            if consume {
                self.tokens -= 1.0;
            }
            BucketDecision {
                allowed: true,
                remaining: self.tokens,
                wait: Duration::ZERO,
            }
        } else {
            BucketDecision {
                allowed: false,
                remaining: self.tokens,
                wait: secs_to_duration((1.0 - self.tokens) / self.refill_rate),
            }
        }
    }

    /// Current token count (as of the last refill)
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum token count
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Seconds as a `Duration`, saturating at `Duration::MAX` instead of panicking
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Wall-clock time `wait` from now
pub(crate) fn eta_after(wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(wait)
        .ok()
        .and_then(|wait| Utc::now().checked_add_signed(wait))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert a decision into `reset_eta` form
pub(crate) fn eta_from_decision(decision: &BucketDecision) -> Option<DateTime<Utc>> {
    (!decision.allowed).then(|| eta_after(decision.wait))
}
