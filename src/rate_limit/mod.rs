//! Rate limiting module
//!
//! Token bucket admission control with two interchangeable strategies:
//!
//! - [`LocalRateLimiter`]: bucket in process memory behind a mutex
//! - [`DistributedRateLimiter`]: bucket in a shared [`BucketStore`] (Redis in
//!   production), refilled and consumed by one atomic script per call
//!
//! Both implement [`RateLimiter`], which is what the request executor holds.

mod distributed;
mod local;
mod store;
mod types;

pub use distributed::{bucket_key, DistributedRateLimiter, DEFAULT_BUCKET_TTL, DEFAULT_KEY_PREFIX};
pub use local::LocalRateLimiter;
pub use store::{BucketStore, MemoryBucketStore, RedisBucketStore};
pub use types::{BucketConfig, BucketDecision, RateLimiter, TokenBucketState};
