//! # quote-sync
//!
//! Rate-limited, token-authenticated sync of market reference data
//! (listed companies, daily quotes) from a paged HTTP API.
//!
//! ## Features
//!
//! - **Token Bucket Rate Limiting**: in-process or shared through Redis
//! - **Token Refresh**: refresh token → access token chain with a safety buffer
//! - **Retry with Backoff**: exponential, jittered, classified by error kind
//! - **Pagination**: `pagination_key` continuation with loop protection
//! - **Cancellation**: every wait in the pipeline can be interrupted
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quote_sync::{load_config, Cancellation, Result, SyncParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config("quote-sync.yaml")?;
//!     let client = config.build_client().await?;
//!
//!     let params = SyncParams::new().code("7203");
//!     let quotes = client.fetch_quotes(&params, &Cancellation::new()).await?;
//!     println!("{} records", quotes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          ApiClient                              │
//! │  fetch_companies()   fetch_quotes()   fetch_all(pagination_key) │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────────┬───────────────┴────────────┬─────────────────────┐
//! │ AuthService  │   RateLimitedExecutor      │   RateLimiter       │
//! ├──────────────┼────────────────────────────┼─────────────────────┤
//! │ Refresh token│ acquire → send → classify  │ Local (mutex)       │
//! │ Access token │ RetryHandler + Backoff     │ Distributed (Redis) │
//! │ Safety buffer│ Cancellation               │ Token bucket        │
//! └──────────────┴────────────────────────────┴─────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types and classification
pub mod error;

/// Common types and type aliases
pub mod types;

/// Cooperative cancellation
pub mod cancel;

/// Retry with exponential backoff
pub mod retry;

/// Token bucket rate limiting
pub mod rate_limit;

/// Rate-limited HTTP executor
pub mod http;

/// Token issuance and refresh
pub mod auth;

/// Market-data API client
pub mod api;

/// Configuration loading
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::{ApiClient, ClientRegistry, Endpoint, FetchError};
pub use cancel::Cancellation;
pub use config::{load_config, SyncConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
