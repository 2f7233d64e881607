//! Common types used throughout quote-sync
//!
//! Shared type aliases and the parameters accepted by sync operations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// A raw provider record: a field-named mapping exactly as upstream sent it
pub type Record = JsonObject;

// ============================================================================
// Sync Parameters
// ============================================================================

/// Parameters for a "fetch companies" / "fetch quotes" sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncParams {
    /// Single trading date
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    /// Range start (inclusive)
    #[serde(default)]
    pub from_date: Option<NaiveDate>,
    /// Range end (inclusive)
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
    /// Security codes; empty means "all"
    #[serde(default)]
    pub codes: Vec<String>,
}

impl SyncParams {
    /// Create empty params
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single date
    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.target_date = Some(date);
        self
    }

    /// Restrict to a date range
    #[must_use]
    pub fn range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    /// Add a security code
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.codes.push(code.into());
        self
    }

    /// Query parameters shared by every request of this sync (everything but `code`)
    pub fn date_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(date) = self.target_date {
            query.push(("date", format_date(date)));
        }
        if let Some(from) = self.from_date {
            query.push(("from", format_date(from)));
        }
        if let Some(to) = self.to_date {
            query.push(("to", format_date(to)));
        }
        query
    }
}

/// Dates go over the wire as `YYYYMMDD`
fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_query() {
        let params = SyncParams::new()
            .date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
            .code("7203");
        assert_eq!(params.date_query(), vec![("date", "20240105".to_string())]);
    }

    #[test]
    fn test_range_query() {
        let params = SyncParams::new().range(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        assert_eq!(
            params.date_query(),
            vec![
                ("from", "20240101".to_string()),
                ("to", "20240131".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_params() {
        assert!(SyncParams::default().date_query().is_empty());
    }
}
