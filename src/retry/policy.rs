//! Retry policy: attempt budget, backoff shape and the retryable-kind table

use crate::error::{Error, ErrorKind, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Immutable retry configuration, shared across many calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
    retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable: default_retryable(),
        }
    }
}

/// Transient transport failures; rate-limit signals are always retryable on top
fn default_retryable() -> HashSet<ErrorKind> {
    [ErrorKind::Network, ErrorKind::Server, ErrorKind::RateLimit]
        .into_iter()
        .collect()
}

impl RetryPolicy {
    /// Create a policy builder
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on the un-jittered delay
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor between consecutive delays
    pub fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    /// Whether delays are randomized
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Error kinds this policy retries
    pub fn retryable_kinds(&self) -> &HashSet<ErrorKind> {
        &self.retryable
    }

    /// Same timing, but retrying only network and 5xx failures (plus rate-limit signals)
    #[must_use]
    pub fn transport_only(&self) -> Self {
        Self {
            retryable: [ErrorKind::Network, ErrorKind::Server].into_iter().collect(),
            ..self.clone()
        }
    }

    /// Classify an error against the table
    ///
    /// Retryable iff its kind is listed or it is a rate-limit signal.
    /// Cancellation is never retried.
    pub fn is_retryable(&self, error: &Error) -> bool {
        match error.kind() {
            ErrorKind::Cancelled => false,
            ErrorKind::RateLimit => true,
            kind => self.retryable.contains(&kind),
        }
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set max retries
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    /// Set the first delay
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the exponential growth factor
    #[must_use]
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.policy.exponential_base = base;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Replace the retryable-kind table
    #[must_use]
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.retryable = kinds.into_iter().collect();
        self
    }

    /// Validate and build the policy
    pub fn build(self) -> Result<RetryPolicy> {
        let p = self.policy;
        if p.initial_delay.is_zero() {
            return Err(Error::config("retry initial_delay must be > 0"));
        }
        if p.max_delay < p.initial_delay {
            return Err(Error::config("retry max_delay must be >= initial_delay"));
        }
        if !(p.exponential_base.is_finite() && p.exponential_base > 1.0) {
            return Err(Error::config("retry exponential_base must be > 1"));
        }
        Ok(p)
    }
}
