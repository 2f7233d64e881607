//! Authentication service
//!
//! Keeps one owner's short-lived access token valid by way of a longer-lived
//! refresh token, renewing either tier when it falls inside the safety buffer.

use super::types::{AuthConfig, Credential, CredentialKind, TokenState};
use crate::cancel::Cancellation;
use crate::error::{Error, ErrorKind, Result};
use crate::http::{RateLimitedExecutor, RequestConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Token manager for a single owner
///
/// Cache hits only take a shared lock. Renewal is serialized per owner, so a
/// burst of callers with a stale token triggers one renewal, not many.
#[derive(Debug)]
pub struct AuthService {
    executor: RateLimitedExecutor,
    config: AuthConfig,
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
}

impl AuthService {
    /// Create a service; a configured refresh token seeds the state
    pub fn new(executor: RateLimitedExecutor, config: AuthConfig) -> Self {
        let state = match seed_refresh_token(&config) {
            Some(refresh) => TokenState::HasRefreshToken { refresh },
            None => TokenState::NoCredential,
        };
        Self {
            executor,
            config,
            state: RwLock::new(state),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Owner this service issues tokens for
    pub fn owner_id(&self) -> &str {
        &self.config.owner_id
    }

    /// Name of the current state
    pub async fn state_name(&self) -> &'static str {
        self.state.read().await.name()
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> TokenState {
        self.state.read().await.clone()
    }

    /// Return a valid access token, renewing the chain as needed
    pub async fn get_access_token(&self, cancel: &Cancellation) -> Result<String> {
        if let Some(token) = self.cached_access_token().await {
            return Ok(token);
        }

        let _guard = cancel.run(self.refresh_lock.lock()).await?;

        // Another caller may have renewed while we waited for the lock
        if let Some(token) = self.cached_access_token().await {
            return Ok(token);
        }

        let access = self.renew(cancel).await?;
        Ok(access.value)
    }

    /// Forget every cached token
    pub async fn clear_tokens(&self) {
        let mut state = self.state.write().await;
        debug!(owner = %self.config.owner_id, from = state.name(), "clearing tokens");
        *state = TokenState::NoCredential;
    }

    async fn cached_access_token(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .access()
            .filter(|access| access.is_valid(self.config.safety_buffer))
            .map(|access| access.value.clone())
    }

    /// Must be called with `refresh_lock` held
    async fn renew(&self, cancel: &Cancellation) -> Result<Credential> {
        let cached = self
            .state
            .read()
            .await
            .refresh()
            .filter(|refresh| refresh.is_valid(self.config.safety_buffer))
            .cloned();

        let (refresh, from_cache) = match cached {
            Some(refresh) => (refresh, true),
            None => (self.issue_refresh_token(cancel).await?, false),
        };
        self.set_state(TokenState::HasRefreshToken {
            refresh: refresh.clone(),
        })
        .await;

        let (refresh, access) = match self.exchange(&refresh, cancel).await {
            Ok(access) => (refresh, access),
            Err(err) if is_rejection(&err) && from_cache && self.config.login.is_some() => {
                warn!(
                    owner = %self.config.owner_id,
                    "cached refresh token rejected, re-acquiring: {err}"
                );
                self.set_state(TokenState::NoCredential).await;
                let refresh = self.issue_refresh_token(cancel).await?;
                self.set_state(TokenState::HasRefreshToken {
                    refresh: refresh.clone(),
                })
                .await;
                let access = self.exchange(&refresh, cancel).await?;
                (refresh, access)
            }
            Err(err) => {
                if is_rejection(&err) {
                    self.set_state(TokenState::NoCredential).await;
                }
                return Err(err);
            }
        };

        self.set_state(TokenState::HasAccessToken {
            refresh,
            access: access.clone(),
        })
        .await;
        Ok(access)
    }

    /// Obtain a refresh token from the long-lived credential (or the configured seed)
    async fn issue_refresh_token(&self, cancel: &Cancellation) -> Result<Credential> {
        let Some(login) = &self.config.login else {
            return seed_refresh_token(&self.config).ok_or_else(|| {
                Error::auth(format!(
                    "no login credentials or refresh token configured for owner '{}'",
                    self.config.owner_id
                ))
            });
        };

        let body = json!({ "mailaddress": login.email, "password": login.password });
        let response: RefreshTokenResponse = self
            .executor
            .post_json(
                &self.config.refresh_token_path,
                &RequestConfig::new().json(body),
                cancel,
            )
            .await
            .map_err(|e| wrap("could not obtain refresh token", e))?;

        let credential = response
            .into_credential(&self.config)
            .map_err(|e| wrap("could not obtain refresh token", e))?;
        info!(
            owner = %self.config.owner_id,
            expires_at = %credential.expires_at,
            "issued refresh token"
        );
        Ok(credential)
    }

    /// Exchange a refresh token for an access token
    async fn exchange(&self, refresh: &Credential, cancel: &Cancellation) -> Result<Credential> {
        let response: AccessTokenResponse = self
            .executor
            .post_json(
                &self.config.access_token_path,
                &RequestConfig::new().query("refreshtoken", refresh.value.as_str()),
                cancel,
            )
            .await
            .map_err(|e| wrap("could not exchange refresh token", e))?;

        let credential = response
            .into_credential(&self.config)
            .map_err(|e| wrap("could not exchange refresh token", e))?;
        info!(
            owner = %self.config.owner_id,
            expires_at = %credential.expires_at,
            "issued access token"
        );
        Ok(credential)
    }

    async fn set_state(&self, next: TokenState) {
        let mut state = self.state.write().await;
        debug!(
            owner = %self.config.owner_id,
            from = state.name(),
            to = next.name(),
            "token state transition"
        );
        *state = next;
    }
}

fn seed_refresh_token(config: &AuthConfig) -> Option<Credential> {
    config.refresh_token.as_ref().map(|token| {
        Credential::new(
            CredentialKind::Refresh,
            token.clone(),
            expiry_after(config.refresh_token_lifetime),
            config.owner_id.clone(),
        )
    })
}

/// Wrap a lower-level failure as an authentication error; cancellation passes through
fn wrap(context: &str, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        err @ Error::Auth { .. } => err,
        err => Error::auth_caused_by(format!("{context}: {err}"), err),
    }
}

/// The issuer refused the token itself (4xx), as opposed to being unreachable
fn is_rejection(err: &Error) -> bool {
    match err {
        Error::Auth {
            source: Some(cause),
            ..
        } => cause.kind() == ErrorKind::Client,
        _ => false,
    }
}

fn expiry_after(lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Expiry fields shared by both issuing endpoints
#[derive(Debug, Default, Deserialize)]
struct Expiry {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl Expiry {
    fn resolve(&self, default_lifetime: Duration) -> DateTime<Utc> {
        match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => expiry_after(Duration::from_secs(secs)),
            (None, None) => expiry_after(default_lifetime),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    #[serde(rename = "refreshToken", alias = "token")]
    token: String,
    #[serde(flatten)]
    expiry: Expiry,
}

impl RefreshTokenResponse {
    fn into_credential(self, config: &AuthConfig) -> Result<Credential> {
        if self.token.is_empty() {
            return Err(Error::validation("issuer returned an empty refresh token"));
        }
        Ok(Credential::new(
            CredentialKind::Refresh,
            self.token,
            self.expiry.resolve(config.refresh_token_lifetime),
            config.owner_id.clone(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(rename = "idToken", alias = "token")]
    token: String,
    #[serde(flatten)]
    expiry: Expiry,
}

impl AccessTokenResponse {
    fn into_credential(self, config: &AuthConfig) -> Result<Credential> {
        if self.token.is_empty() {
            return Err(Error::validation("issuer returned an empty access token"));
        }
        Ok(Credential::new(
            CredentialKind::Access,
            self.token,
            self.expiry.resolve(config.access_token_lifetime),
            config.owner_id.clone(),
        ))
    }
}
