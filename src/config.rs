//! Configuration
//!
//! Sync settings are loaded from YAML, with secrets optionally supplied
//! through the environment, and turned into the runtime pieces of the
//! pipeline (retry policy, rate limiter, executor, API client).

use crate::api::ApiClient;
use crate::auth::{AuthConfig, AuthService, LoginCredentials};
use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateLimitedExecutor};
use crate::rate_limit::{
    BucketConfig, DistributedRateLimiter, LocalRateLimiter, RateLimiter, RedisBucketStore,
    DEFAULT_KEY_PREFIX,
};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding `auth.email`
pub const ENV_EMAIL: &str = "QUOTE_SYNC_EMAIL";
/// Environment variable overriding `auth.password`
pub const ENV_PASSWORD: &str = "QUOTE_SYNC_PASSWORD";
/// Environment variable overriding `auth.refresh_token`
pub const ENV_REFRESH_TOKEN: &str = "QUOTE_SYNC_REFRESH_TOKEN";
/// Environment variable overriding `rate_limit.redis_url`
pub const ENV_REDIS_URL: &str = "QUOTE_SYNC_REDIS_URL";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete sync configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// API base URL; endpoint paths are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limit settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Credentials
    #[serde(default)]
    pub auth: AuthSettings,

    /// Provider name, part of the rate-limit bucket key
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Codes fetched at once by multi-code quote syncs
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_base_url() -> String {
    "https://api.jquants.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_provider() -> String {
    "jquants".to_string()
}

fn default_concurrency() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthSettings::default(),
            provider: default_provider(),
            concurrency: default_concurrency(),
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,

    /// Upper bound on the computed delay
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    /// Growth factor per attempt
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Randomize delays by a factor in `[0.5, 1.5]`
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            exponential_base: default_exponential_base(),
            jitter: true,
        }
    }
}

// ============================================================================
// Rate Limit
// ============================================================================

/// Where the token bucket lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    /// Process memory
    #[default]
    Local,
    /// Redis, shared by every process using the same key
    Redis,
}

/// Rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate; the bucket holds twice this for bursts
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Bucket backend
    #[serde(default)]
    pub backend: LimiterBackend,

    /// Redis URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key namespace in Redis
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bucket name within the provider
    #[serde(default = "default_source")]
    pub source: String,

    /// Idle expiry of the Redis key
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_source() -> String {
    "api".to_string()
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            backend: LimiterBackend::Local,
            redis_url: None,
            key_prefix: default_key_prefix(),
            source: default_source(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

/// Credential settings
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Account the tokens belong to; defaults to the e-mail
    #[serde(default)]
    pub owner_id: Option<String>,

    /// Account e-mail
    #[serde(default)]
    pub email: Option<String>,

    /// Account password
    #[serde(default)]
    pub password: Option<String>,

    /// Pre-issued refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Renew tokens this long before expiry
    #[serde(default = "default_safety_buffer_secs")]
    pub safety_buffer_secs: u64,
}

fn default_safety_buffer_secs() -> u64 {
    300
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            owner_id: None,
            email: None,
            password: None,
            refresh_token: None,
            safety_buffer_secs: default_safety_buffer_secs(),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("owner_id", &self.owner_id)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("safety_buffer_secs", &self.safety_buffer_secs)
            .finish()
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a config file, apply environment overrides and validate it
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut config = SyncConfig::from_yaml_str(&content)?;
    config.apply_env();
    config.validate()?;
    debug!("loaded config from {}", path.display());
    Ok(config)
}

impl SyncConfig {
    /// Parse YAML without applying overrides or validating
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Defaults plus environment overrides, validated
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay secrets from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay secrets from `lookup`; empty values are ignored
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(email) = get(ENV_EMAIL) {
            self.auth.email = Some(email);
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.auth.password = Some(password);
        }
        if let Some(token) = get(ENV_REFRESH_TOKEN) {
            self.auth.refresh_token = Some(token);
        }
        if let Some(url) = get(ENV_REDIS_URL) {
            self.rate_limit.redis_url = Some(url);
        }
    }

    /// Check every resolved value
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)?;
        if self.timeout_secs == 0 {
            return Err(Error::config("timeout_secs must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be greater than zero"));
        }
        if self.provider.is_empty() {
            return Err(Error::missing_field("provider"));
        }

        self.retry_policy()?;
        self.bucket_config()?;
        if self.rate_limit.backend == LimiterBackend::Redis && self.rate_limit.redis_url.is_none() {
            return Err(Error::missing_field("rate_limit.redis_url"));
        }

        match (&self.auth.email, &self.auth.password) {
            (Some(_), None) => return Err(Error::missing_field("auth.password")),
            (None, Some(_)) => return Err(Error::missing_field("auth.email")),
            _ => {}
        }
        Ok(())
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy from the `retry` section
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let retry = &self.retry;
        RetryPolicy::builder()
            .max_retries(retry.max_retries)
            .initial_delay(secs("retry.initial_delay_secs", retry.initial_delay_secs)?)
            .max_delay(secs("retry.max_delay_secs", retry.max_delay_secs)?)
            .exponential_base(retry.exponential_base)
            .jitter(retry.jitter)
            .build()
    }

    /// Bucket shape from `rate_limit.requests_per_minute`
    pub fn bucket_config(&self) -> Result<BucketConfig> {
        BucketConfig::per_minute(self.rate_limit.requests_per_minute)
    }

    /// Token service settings from the `auth` section
    pub fn auth_config(&self) -> Result<AuthConfig> {
        let auth = &self.auth;
        let login = match (&auth.email, &auth.password) {
            (Some(email), Some(password)) => Some(LoginCredentials {
                email: email.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        if login.is_none() && auth.refresh_token.is_none() {
            return Err(Error::config(format!(
                "no credentials: set auth.email and auth.password ({ENV_EMAIL}, {ENV_PASSWORD}) \
                 or auth.refresh_token ({ENV_REFRESH_TOKEN})"
            )));
        }

        let owner_id = auth
            .owner_id
            .clone()
            .or_else(|| auth.email.clone())
            .unwrap_or_else(|| "default".to_string());

        Ok(AuthConfig {
            owner_id,
            login,
            refresh_token: auth.refresh_token.clone(),
            safety_buffer: Duration::from_secs(auth.safety_buffer_secs),
            ..AuthConfig::default()
        })
    }

    /// Executor settings
    pub fn http_config(&self) -> Result<HttpClientConfig> {
        Ok(HttpClientConfig::builder()
            .base_url(self.base_url.clone())
            .timeout(self.timeout())
            .retry(self.retry_policy()?)
            .build())
    }

    /// Build the configured rate limiter, connecting to Redis if needed
    pub async fn build_limiter(&self) -> Result<Arc<dyn RateLimiter>> {
        let bucket = self.bucket_config()?;
        match self.rate_limit.backend {
            LimiterBackend::Local => Ok(Arc::new(LocalRateLimiter::new(bucket))),
            LimiterBackend::Redis => {
                let url = self
                    .rate_limit
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| Error::missing_field("rate_limit.redis_url"))?;
                let store = RedisBucketStore::connect(url).await?;
                let limiter = DistributedRateLimiter::new(
                    Arc::new(store),
                    &self.provider,
                    &self.rate_limit.source,
                    bucket,
                )
                .with_prefix(&self.rate_limit.key_prefix)
                .with_ttl(Duration::from_secs(self.rate_limit.ttl_secs));
                info!(key = limiter.key(), "using distributed rate limiter");
                Ok(Arc::new(limiter))
            }
        }
    }

    /// Build the executor around `limiter`
    pub fn build_executor(&self, limiter: Arc<dyn RateLimiter>) -> Result<RateLimitedExecutor> {
        RateLimitedExecutor::new(self.http_config()?, limiter)
    }

    /// Build a ready-to-use API client for the configured account
    pub async fn build_client(&self) -> Result<ApiClient> {
        let auth_config = self.auth_config()?;
        let limiter = self.build_limiter().await?;
        let executor = self.build_executor(limiter)?;
        let auth = Arc::new(AuthService::new(executor.clone(), auth_config));
        Ok(ApiClient::new(executor, auth).with_concurrency(self.concurrency))
    }
}

fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::config(format!("{field} must be a non-negative number, got {value}")))
}
