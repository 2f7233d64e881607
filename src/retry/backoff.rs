//! Exponential backoff with optional jitter

use super::policy::RetryPolicy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Jitter multiplies the computed delay by a factor drawn from this range
const JITTER_RANGE: std::ops::RangeInclusive<f64> = 0.5..=1.5;

/// Computes the delay before retry number `attempt`
///
/// `delay(n) = min(initial * base^n, max)`, scaled by a uniform factor in
/// `[0.5, 1.5]` when jitter is enabled. The result is never negative and never
/// exceeds `max * 1.5` (saturating at `Duration::MAX`).
#[derive(Debug)]
pub struct Backoff {
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
    rng: Mutex<StdRng>,
}

impl Backoff {
    /// Create a backoff from a retry policy, seeding jitter from the OS
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::build(policy, StdRng::from_entropy())
    }

    /// Create a backoff whose jitter sequence is fixed by `seed`
    pub fn with_seed(policy: &RetryPolicy, seed: u64) -> Self {
        Self::build(policy, StdRng::seed_from_u64(seed))
    }

    fn build(policy: &RetryPolicy, rng: StdRng) -> Self {
        Self {
            initial_delay: policy.initial_delay(),
            max_delay: policy.max_delay(),
            exponential_base: policy.exponential_base(),
            jitter: policy.jitter(),
            rng: Mutex::new(rng),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        // powi overflows to +inf for large attempts; min() clamps that to max
        let base = if raw.is_nan() { max } else { raw.min(max) };

        let secs = if self.jitter {
            let factor = self
                .rng
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .gen_range(JITTER_RANGE);
            base * factor
        } else {
            base
        };

        // max_delay * 1.5 can exceed what a Duration holds
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}
