//! Error types for quote-sync
//!
//! Every failure in the request pipeline is an [`Error`], and every `Error`
//! maps onto exactly one [`ErrorKind`]. Retry decisions are made on the kind,
//! never on the concrete variant, so the classification table lives in
//! [`crate::retry::RetryPolicy`] rather than on the errors themselves.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of every error the pipeline can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection failure or transport timeout
    Network,
    /// HTTP 429 or an equivalent throttling signal from upstream
    RateLimit,
    /// HTTP 5xx
    Server,
    /// HTTP 4xx other than 429
    Client,
    /// Token issuance or validation failure
    Authentication,
    /// Malformed or protocol-violating payload
    Validation,
    /// The rate limiter's backing store could not be reached
    RateLimiterUnavailable,
    /// Caller-initiated cancellation
    Cancelled,
    /// Invalid or missing configuration
    Config,
    /// Local I/O failure
    Io,
}

impl ErrorKind {
    /// Stable snake_case name, used in logs and CLI output
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Client => "client",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::RateLimiterUnavailable => "rate_limiter_unavailable",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for quote-sync
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Rate limited by upstream{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Client error HTTP {status}: {body}")]
    Client { status: u16, body: String },

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    // ============================================================================
    // Payload Errors
    // ============================================================================
    #[error("Validation error: {message}")]
    Validation { message: String },

    // ============================================================================
    // Infrastructure Errors
    // ============================================================================
    #[error("Rate limiter unavailable: {message}")]
    RateLimiterUnavailable { message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create a network error without an underlying transport error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create an auth error with no underlying cause
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a lower-level error as an authentication failure, keeping it as the cause
    pub fn auth_caused_by(message: impl Into<String>, cause: Error) -> Self {
        Self::Auth {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a rate limiter unavailable error
    pub fn limiter_unavailable(message: impl Into<String>) -> Self {
        Self::RateLimiterUnavailable {
            message: message.into(),
        }
    }

    /// Build the error for a non-success HTTP status
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server {
                status,
                body: body.into(),
            },
            _ => Self::Client {
                status,
                body: body.into(),
            },
        }
    }

    /// The classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. }
            | Error::MissingConfigField { .. }
            | Error::YamlParse(_)
            | Error::InvalidUrl(_) => ErrorKind::Config,
            Error::JsonParse(_) | Error::Validation { .. } => ErrorKind::Validation,
            Error::Io(_) => ErrorKind::Io,
            Error::Network { .. } | Error::Timeout { .. } => ErrorKind::Network,
            Error::RateLimited { .. } => ErrorKind::RateLimit,
            Error::Server { .. } => ErrorKind::Server,
            Error::Client { .. } => ErrorKind::Client,
            Error::Auth { .. } => ErrorKind::Authentication,
            Error::RateLimiterUnavailable { .. } => ErrorKind::RateLimiterUnavailable,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Server-suggested delay carried by a rate-limit signal
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status for errors that came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RateLimited { .. } => Some(429),
            Error::Server { status, .. } | Error::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is an upstream 401
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Client { status: 401, .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::validation(format!("Failed to decode response body: {e}"));
        }
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), e.to_string(), None);
        }
        Self::Network {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::limiter_unavailable(e.to_string())
    }
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs_f64()),
        None => String::new(),
    }
}

/// Result type alias for quote-sync
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::missing_field("auth.email");
        assert_eq!(err.to_string(), "Missing required config field: auth.email");

        let err = Error::from_status(404, "Not found", None);
        assert_eq!(err.to_string(), "Client error HTTP 404: Not found");

        let err = Error::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.to_string(), "Rate limited by upstream, retry after 3s");
    }

    #[test_case(429, ErrorKind::RateLimit ; "too many requests")]
    #[test_case(500, ErrorKind::Server ; "internal server error")]
    #[test_case(503, ErrorKind::Server ; "service unavailable")]
    #[test_case(400, ErrorKind::Client ; "bad request")]
    #[test_case(401, ErrorKind::Client ; "unauthorized")]
    #[test_case(404, ErrorKind::Client ; "not found")]
    fn test_kind_from_status(status: u16, expected: ErrorKind) {
        assert_eq!(Error::from_status(status, "", None).kind(), expected);
    }

    #[test]
    fn test_auth_error_keeps_cause() {
        let err = Error::auth_caused_by("refresh failed", Error::from_status(503, "down", None));
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let cause = std::error::Error::source(&err).unwrap();
        assert_eq!(cause.to_string(), "Server error HTTP 503: down");
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let limited = Error::from_status(429, "", Some(Duration::from_secs(2)));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(Error::from_status(500, "", None).retry_after(), None);
    }

    #[test]
    fn test_unauthorized() {
        assert!(Error::from_status(401, "", None).is_unauthorized());
        assert!(!Error::from_status(403, "", None).is_unauthorized());
    }
}
