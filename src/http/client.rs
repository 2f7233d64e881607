//! Rate-limited request executor
//!
//! Every outbound call goes through the same sequence:
//! - take one token from the rate limiter (never refunded, even on failure)
//! - send the request, racing the caller's cancellation signal
//! - classify the response into the error taxonomy
//! - retry network and 5xx failures (and 429s) under the retry policy

use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryHandler, RetryPolicy};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL that relative targets are joined onto
    pub base_url: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Retry policy (narrowed to transport failures by the executor)
    pub retry: RetryPolicy,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            default_headers: HashMap::new(),
            user_agent: format!("quote-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Bearer token for the `Authorization` header
    pub bearer: Option<String>,
    /// Request body (JSON)
    pub body: Option<Value>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Authenticate with a bearer token
    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Composes rate limiting, retry and the raw HTTP call
#[derive(Clone)]
pub struct RateLimitedExecutor {
    client: Client,
    config: HttpClientConfig,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryHandler,
}

impl RateLimitedExecutor {
    /// Create an executor with its own HTTP client
    pub fn new(config: HttpClientConfig, limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config, limiter))
    }

    /// Create an executor around an existing HTTP client
    pub fn with_client(client: Client, config: HttpClientConfig, limiter: Arc<dyn RateLimiter>) -> Self {
        let retry = RetryHandler::new(config.retry.transport_only());
        Self {
            client,
            config,
            limiter,
            retry,
        }
    }

    /// The rate limiter every request passes through
    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// The effective retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Make a rate-limited, retried request
    ///
    /// Returns the response only for 2xx statuses; everything else becomes
    /// a classified [`Error`]. The error of the last attempt is returned as is.
    pub async fn request(
        &self,
        method: Method,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> Result<Response> {
        self.request_counted(method, target, config, cancel).await.0
    }

    /// [`request`](Self::request), also reporting how many attempts were sent
    pub async fn request_counted(
        &self,
        method: Method,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> (Result<Response>, u32) {
        let url = match self.build_url(target) {
            Ok(url) => url,
            Err(err) => return (Err(err), 0),
        };
        let attempts = AtomicU32::new(0);

        let (method, url, attempts_ref) = (&method, &url, &attempts);
        let result = self
            .retry
            .execute(cancel, || async move {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                self.limiter.acquire(cancel).await?;
                self.send_once(method, url, config, cancel).await
            })
            .await;
        let attempts = attempts.load(Ordering::Relaxed);

        if let Err(ref err) = result {
            if !matches!(err, Error::Cancelled) {
                error!(
                    endpoint = url.path(),
                    kind = %err.kind(),
                    attempts,
                    "{method} {} failed: {err}",
                    url.path()
                );
            }
        }
        (result, attempts)
    }

    /// Make a request and parse the JSON response
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> Result<T> {
        self.request_json_counted(method, target, config, cancel).await.0
    }

    /// [`request_json`](Self::request_json), also reporting how many attempts were sent
    pub async fn request_json_counted<T: DeserializeOwned>(
        &self,
        method: Method,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> (Result<T>, u32) {
        let (response, attempts) = self.request_counted(method, target, config, cancel).await;
        let parsed = match response {
            Ok(response) => decode_json(response, target, cancel).await,
            Err(err) => Err(err),
        };
        (parsed, attempts)
    }

    /// GET and parse JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> Result<T> {
        self.request_json(Method::GET, target, config, cancel).await
    }

    /// POST and parse JSON
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        target: &str,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> Result<T> {
        self.request_json(Method::POST, target, config, cancel).await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        config: &RequestConfig,
        cancel: &Cancellation,
    ) -> Result<Response> {
        let timeout = config.timeout.unwrap_or(self.config.timeout);
        let mut req = self.client.request(method.clone(), url.clone()).timeout(timeout);

        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in &config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            req = req.query(&config.query);
        }
        if let Some(ref body) = config.body {
            req = req.json(body);
        }
        if let Some(ref token) = config.bearer {
            req = req.bearer_auth(token);
        }

        let response = match cancel.run(req.send()).await? {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(Error::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(e) => return Err(Error::from(e)),
        };

        let status = response.status();
        if status.is_success() {
            debug!("{} {} -> {}", method, url.path(), status.as_u16());
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = match cancel.run(response.text()).await? {
            Ok(body) => body,
            Err(e) => {
                debug!("{} {}: could not read error body: {e}", method, url.path());
                String::new()
            }
        };
        debug!("{} {} -> {}: {}", method, url.path(), status.as_u16(), body);
        Err(Error::from_status(status.as_u16(), body, retry_after))
    }

    /// Build full URL from path
    fn build_url(&self, target: &str) -> Result<Url> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(Url::parse(target)?);
        }

        let joined = match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = target.trim_start_matches('/');
                format!("{base}/{path}")
            }
            None => target.to_string(),
        };
        Ok(Url::parse(&joined)?)
    }
}

async fn decode_json<T: DeserializeOwned>(
    response: Response,
    target: &str,
    cancel: &Cancellation,
) -> Result<T> {
    let bytes = cancel.run(response.bytes()).await??;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::validation(format!("Malformed JSON from {target}: {e}")))
}

impl std::fmt::Debug for RateLimitedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedExecutor")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// Read `Retry-After` as delta-seconds or an HTTP date
///
/// Values that don't fit a `Duration` are ignored, leaving the backoff in charge.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
