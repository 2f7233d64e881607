//! CLI runner - executes commands

use crate::api::{ApiClient, Endpoint, FetchError};
use crate::cancel::Cancellation;
use crate::cli::commands::{Cli, Commands, OutputFormat, SyncArgs};
use crate::config::{load_config, SyncConfig};
use crate::error::Result;
use crate::types::Record;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        let cancel = self.cancellation();

        match &self.cli.command {
            Commands::Companies(args) => {
                self.sync(&config, Endpoint::ListedInfo, args, &cancel)
                    .await
            }
            Commands::Quotes(args) => {
                self.sync(&config, Endpoint::DailyQuotes, args, &cancel)
                    .await
            }
            Commands::Check => self.check(&config, &cancel).await,
        }
    }

    fn load_config(&self) -> Result<SyncConfig> {
        match &self.cli.config {
            Some(path) => load_config(path),
            None => SyncConfig::from_env(),
        }
    }

    /// Cancellation wired to `--timeout` and Ctrl-C
    fn cancellation(&self) -> Cancellation {
        let cancel = match self.cli.timeout {
            Some(secs) => Cancellation::with_timeout(Duration::from_secs(secs)),
            None => Cancellation::new(),
        };

        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                on_signal.cancel();
            }
        });
        cancel
    }

    async fn sync(
        &self,
        config: &SyncConfig,
        endpoint: Endpoint,
        args: &SyncArgs,
        cancel: &Cancellation,
    ) -> Result<()> {
        let client = config.build_client().await?;
        let params = args.to_params();
        let start = Instant::now();

        let result = match endpoint {
            Endpoint::ListedInfo => client.fetch_companies(&params, cancel).await,
            Endpoint::DailyQuotes => client.fetch_quotes(&params, cancel).await,
        };

        match result {
            Ok(records) => {
                self.output_records(&records);
                info!(
                    endpoint = %endpoint,
                    records = records.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "sync complete"
                );
                Ok(())
            }
            Err(err) => {
                // Partial data is still emitted; the caller decides what to keep
                self.output_records(&err.records);
                report_failure(&err);
                Err(err.into())
            }
        }
    }

    async fn check(&self, config: &SyncConfig, cancel: &Cancellation) -> Result<()> {
        let client = config.build_client().await?;

        match self.probe(&client, cancel).await {
            Ok(status) => {
                self.output_message(&status);
                Ok(())
            }
            Err(e) => {
                self.output_message(&json!({
                    "type": "CONNECTION_STATUS",
                    "connectionStatus": {
                        "status": "FAILED",
                        "kind": e.kind().as_str(),
                        "message": format!("Connection failed: {e}")
                    }
                }));
                Err(e)
            }
        }
    }

    async fn probe(&self, client: &ApiClient, cancel: &Cancellation) -> Result<Value> {
        client.auth().get_access_token(cancel).await?;
        let limiter = client.executor().limiter();
        let remaining = limiter.remaining().await?;
        let reset_eta = limiter.reset_eta().await?;

        Ok(json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": {
                "status": "SUCCEEDED",
                "message": "Access token obtained",
                "owner": client.auth().owner_id(),
                "tokenState": client.auth().state_name().await,
                "rateLimit": {
                    "remaining": remaining,
                    "resetEta": reset_eta.map(|eta| eta.to_rfc3339()),
                }
            }
        }))
    }

    fn output_records(&self, records: &[Record]) {
        for record in records {
            self.output_message(record);
        }
    }

    fn output_message(&self, msg: &impl Serialize) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

fn report_failure(err: &FetchError) {
    eprintln!(
        "sync failed: kind={} endpoint={} attempts={} collected={} error={}",
        err.kind(),
        err.endpoint,
        err.attempts,
        err.records.len(),
        err.source
    );
}
