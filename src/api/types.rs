//! API client types

use crate::error::{Error, ErrorKind, Result};
use crate::types::{JsonValue, Record};
use std::fmt;

/// Query parameter and response field carrying the continuation token
pub const PAGINATION_KEY: &str = "pagination_key";

/// Logical upstream endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Listed-companies reference data
    ListedInfo,
    /// Daily OHLCV quotes
    DailyQuotes,
}

impl Endpoint {
    /// Request path, relative to the base URL
    pub fn path(self) -> &'static str {
        match self {
            Self::ListedInfo => "/listed/info",
            Self::DailyQuotes => "/prices/daily_quotes",
        }
    }

    /// Response field holding the page's records
    pub fn collection_key(self) -> &'static str {
        match self {
            Self::ListedInfo => "info",
            Self::DailyQuotes => "daily_quotes",
        }
    }

    /// Stable name for logs and error reports
    pub fn name(self) -> &'static str {
        match self {
            Self::ListedInfo => "listed_info",
            Self::DailyQuotes => "daily_quotes",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sync that failed part-way
///
/// `records` holds everything collected before the failure, in request order;
/// the caller decides whether to keep it.
#[derive(Debug, thiserror::Error)]
#[error("{endpoint} fetch failed after {} records: {source}", .records.len())]
pub struct FetchError {
    /// Endpoint that was being fetched
    pub endpoint: Endpoint,
    /// Records collected before the failure
    pub records: Vec<Record>,
    /// The terminal error
    #[source]
    pub source: Error,
    /// Attempts sent for the request that failed; zero when it failed
    /// before any page request went out (e.g. authentication)
    pub attempts: u32,
}

impl FetchError {
    /// Create a fetch error
    pub fn new(endpoint: Endpoint, records: Vec<Record>, source: Error) -> Self {
        Self {
            endpoint,
            records,
            source,
            attempts: 0,
        }
    }

    /// Record how many attempts the failing request took
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Classification of the terminal error
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        err.source
    }
}

/// One decoded page
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Page {
    pub records: Vec<Record>,
    pub next_key: Option<String>,
}

impl Page {
    /// Split a response body into records and the continuation token
    pub fn parse(endpoint: Endpoint, body: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut body) = body else {
            return Err(Error::validation(format!(
                "{endpoint} response is not a JSON object"
            )));
        };

        let key = endpoint.collection_key();
        let records = match body.remove(key) {
            Some(JsonValue::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    JsonValue::Object(record) => Ok(record),
                    other => Err(Error::validation(format!(
                        "{endpoint} record is not an object: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::validation(format!(
                    "{endpoint} field '{key}' is not an array: {other}"
                )))
            }
            None => {
                return Err(Error::validation(format!(
                    "{endpoint} response has no '{key}' field"
                )))
            }
        };

        let next_key = match body.remove(PAGINATION_KEY) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(key)) if key.is_empty() => None,
            Some(JsonValue::String(key)) => Some(key),
            Some(other) => {
                return Err(Error::validation(format!(
                    "{endpoint} returned a non-string {PAGINATION_KEY}: {other}"
                )))
            }
        };

        Ok(Self { records, next_key })
    }
}
