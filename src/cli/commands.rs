//! CLI commands and argument parsing

use crate::types::SyncParams;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Sync listed companies and daily quotes from a rate-limited market-data API
#[derive(Parser, Debug)]
#[command(name = "quote-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML); defaults plus environment when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Cancel the whole operation after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch listed-company records
    Companies(SyncArgs),

    /// Fetch daily quote records
    Quotes(SyncArgs),

    /// Obtain an access token and report the rate limiter state
    Check,
}

/// Filters shared by the sync commands
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Single trading date (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub date: Option<NaiveDate>,

    /// Range start (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Range end (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Security code; repeat for several
    #[arg(long = "code")]
    pub codes: Vec<String>,
}

impl SyncArgs {
    /// Convert to sync parameters
    pub fn to_params(&self) -> SyncParams {
        SyncParams {
            target_date: self.date,
            from_date: self.from,
            to_date: self.to,
            codes: self.codes.clone(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON record per line
    Json,
    /// Indented JSON
    Pretty,
}
