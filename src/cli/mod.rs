//! CLI module
//!
//! Command-line interface for running syncs.
//!
//! # Commands
//!
//! - `companies` - Fetch listed-company records
//! - `quotes` - Fetch daily quote records
//! - `check` - Obtain a token and report rate limiter state

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat, SyncArgs};
pub use runner::Runner;
