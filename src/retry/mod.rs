//! Retry module
//!
//! Wraps async operations with exponential backoff, jitter and a table-driven
//! classification of which [`ErrorKind`](crate::ErrorKind)s are worth retrying.
//!
//! # Features
//!
//! - **Backoff**: `min(initial * base^n, max)`, optionally jittered by `[0.5, 1.5]`
//! - **Policy table**: retryable kinds are data, not per-error hooks
//! - **Rate-limit hints**: an upstream `Retry-After` replaces the computed delay
//! - **Cancellation**: backoff sleeps end early with `Error::Cancelled`

mod backoff;
mod handler;
mod policy;

pub use backoff::Backoff;
pub use handler::{execute_with_retry, RequestAttempt, RetryHandler};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
