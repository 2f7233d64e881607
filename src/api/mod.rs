//! API module
//!
//! Client for the listed-companies and daily-quotes endpoints.
//!
//! # Features
//!
//! - **Pagination**: follows `pagination_key`, aborting on a repeated key
//! - **Token injection**: every page carries a current access token
//! - **401 recovery**: a rejected token is cleared and re-issued once
//! - **Partial results**: failures return the records collected so far

mod client;
mod registry;
mod types;

pub use client::{ApiClient, DEFAULT_CONCURRENCY};
pub use registry::ClientRegistry;
pub use types::{Endpoint, FetchError, PAGINATION_KEY};
