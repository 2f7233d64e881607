//! Authentication module
//!
//! Two-tier token chain: a long-lived credential (e-mail and password) is
//! exchanged for a refresh token, which is exchanged for a short-lived access
//! (ID) token sent as `Authorization: Bearer`.
//!
//! The [`AuthService`] caches both tiers per owner, renews them a safety buffer
//! before expiry, and serializes renewal so concurrent callers share one
//! round-trip to the issuer.

mod service;
mod types;

pub use service::AuthService;
pub use types::{
    AuthConfig, Credential, CredentialKind, LoginCredentials, TokenState,
    DEFAULT_ACCESS_TOKEN_LIFETIME, DEFAULT_REFRESH_TOKEN_LIFETIME, DEFAULT_SAFETY_BUFFER,
};

#[cfg(test)]
mod tests;
