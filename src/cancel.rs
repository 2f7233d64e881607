//! Cooperative cancellation
//!
//! A [`Cancellation`] is shared by every layer of one logical operation. Any
//! wait in the pipeline (rate limiter, retry backoff, the transport call) races
//! against it and resolves to [`Error::Cancelled`] once it fires.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable cancellation signal
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    /// Create a signal that has not fired
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Create a signal that fires by itself after `timeout`
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let cancel = Self::new();
        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer.cancel();
        });
        cancel
    }

    /// Fire the signal; every current and future waiter observes it
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal fires
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drive `fut` to completion unless cancelled first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
