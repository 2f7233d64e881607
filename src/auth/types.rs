//! Credential and token-state types

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Default margin before expiry at which a token is renewed
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Refresh-token lifetime assumed when the issuer does not say
pub const DEFAULT_REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(7 * 24 * 3600);

/// Access-token lifetime assumed when the issuer does not say
pub const DEFAULT_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Which tier of the token chain a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Long-lived token used to mint access tokens
    Refresh,
    /// Short-lived token sent as `Authorization: Bearer`
    Access,
}

/// An issued token; replaced wholesale on renewal, never mutated
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Token tier
    pub kind: CredentialKind,
    /// Opaque token value
    pub value: String,
    /// Hard expiry reported (or assumed) at issue time
    pub expires_at: DateTime<Utc>,
    /// Account the token was issued to
    pub owner_id: String,
}

impl Credential {
    /// Create a credential
    pub fn new(
        kind: CredentialKind,
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            expires_at,
            owner_id: owner_id.into(),
        }
    }

    /// Valid iff `now + buffer < expires_at`
    ///
    /// Strict: a token expiring exactly at `now + buffer` is already stale.
    pub fn is_valid_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        let Ok(buffer) = chrono::Duration::from_std(buffer) else {
            return false;
        };
        match now.checked_add_signed(buffer) {
            Some(deadline) => deadline < self.expires_at,
            None => false,
        }
    }

    /// [`is_valid_at`](Self::is_valid_at) against the current time
    pub fn is_valid(&self, buffer: Duration) -> bool {
        self.is_valid_at(Utc::now(), buffer)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Where an owner is in the token chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenState {
    /// Nothing cached
    #[default]
    NoCredential,
    /// A refresh token but no access token yet
    HasRefreshToken {
        /// The refresh token
        refresh: Credential,
    },
    /// Both tiers cached
    HasAccessToken {
        /// The refresh token the access token was minted from
        refresh: Credential,
        /// The access token
        access: Credential,
    },
}

impl TokenState {
    /// State name for logs and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::HasRefreshToken { .. } => "has_refresh_token",
            Self::HasAccessToken { .. } => "has_access_token",
        }
    }

    /// Cached refresh token, if any
    pub fn refresh(&self) -> Option<&Credential> {
        match self {
            Self::NoCredential => None,
            Self::HasRefreshToken { refresh } | Self::HasAccessToken { refresh, .. } => {
                Some(refresh)
            }
        }
    }

    /// Cached access token, if any
    pub fn access(&self) -> Option<&Credential> {
        match self {
            Self::HasAccessToken { access, .. } => Some(access),
            _ => None,
        }
    }
}

/// Long-lived account credential exchanged for refresh tokens
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    /// Account e-mail
    pub email: String,
    /// Account password
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration of one owner's [`AuthService`](super::AuthService)
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Account the tokens belong to
    pub owner_id: String,
    /// Credential used to obtain refresh tokens
    pub login: Option<LoginCredentials>,
    /// Pre-issued refresh token to start from
    pub refresh_token: Option<String>,
    /// Renew tokens this long before they expire
    pub safety_buffer: Duration,
    /// Assumed refresh-token lifetime when the issuer omits it
    pub refresh_token_lifetime: Duration,
    /// Assumed access-token lifetime when the issuer omits it
    pub access_token_lifetime: Duration,
    /// Endpoint exchanging login credentials for a refresh token
    pub refresh_token_path: String,
    /// Endpoint exchanging a refresh token for an access token
    pub access_token_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            owner_id: "default".to_string(),
            login: None,
            refresh_token: None,
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            refresh_token_lifetime: DEFAULT_REFRESH_TOKEN_LIFETIME,
            access_token_lifetime: DEFAULT_ACCESS_TOKEN_LIFETIME,
            refresh_token_path: "/token/auth_user".to_string(),
            access_token_path: "/token/auth_refresh".to_string(),
        }
    }
}

impl AuthConfig {
    /// Config that logs in with e-mail and password
    pub fn with_login(
        owner_id: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            login: Some(LoginCredentials {
                email: email.into(),
                password: password.into(),
            }),
            ..Self::default()
        }
    }

    /// Config that starts from a pre-issued refresh token
    pub fn with_refresh_token(owner_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            refresh_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Override the safety buffer
    #[must_use]
    pub fn safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }
}
