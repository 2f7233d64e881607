//! HTTP module
//!
//! Provides the rate-limited request executor that every upstream call
//! (data endpoints and token endpoints alike) goes through.
//!
//! # Features
//!
//! - **Rate Limiting**: one token per attempt from any [`RateLimiter`](crate::rate_limit::RateLimiter)
//! - **Automatic Retries**: network and 5xx failures, plus 429 with `Retry-After`
//! - **Error Classification**: statuses map onto [`ErrorKind`](crate::ErrorKind)
//! - **Cancellation**: the transport call races the caller's signal

mod client;

pub use client::{HttpClientConfig, HttpClientConfigBuilder, RateLimitedExecutor, RequestConfig};

#[cfg(test)]
mod tests;
