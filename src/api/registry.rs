//! Per-owner client registry

use super::client::ApiClient;
use crate::auth::{AuthConfig, AuthService};
use crate::http::RateLimitedExecutor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Builds one [`ApiClient`] per owner on first use and hands out the same one afterwards
///
/// Clients for different owners share the executor (and so the rate limiter)
/// but never share tokens.
#[derive(Debug)]
pub struct ClientRegistry {
    executor: RateLimitedExecutor,
    concurrency: usize,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(executor: RateLimitedExecutor, concurrency: usize) -> Self {
        Self {
            executor,
            concurrency,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The client for `config.owner_id`, built from `config` if not yet known
    ///
    /// An existing client is returned as is; `config` is ignored for it.
    pub fn get_or_create(&self, config: AuthConfig) -> Arc<ApiClient> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&config.owner_id) {
            return Arc::clone(client);
        }

        debug!(owner = %config.owner_id, "creating API client");
        let owner_id = config.owner_id.clone();
        let auth = Arc::new(AuthService::new(self.executor.clone(), config));
        let client = Arc::new(
            ApiClient::new(self.executor.clone(), auth).with_concurrency(self.concurrency),
        );
        clients.insert(owner_id, Arc::clone(&client));
        client
    }

    /// The client for `owner_id`, if one was created
    pub fn get(&self, owner_id: &str) -> Option<Arc<ApiClient>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner_id)
            .cloned()
    }

    /// Number of clients built so far
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no client was built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
