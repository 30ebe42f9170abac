//! Source adapter seam
//!
//! The harvester never fetches pages itself. A [`SourceAdapter`] turns an
//! entity id into raw season rows, or a league + season into a roster. The
//! production adapter speaks JSON over HTTP ([`http::HttpSourceAdapter`]);
//! tests plug in scripted adapters.

pub mod http;

pub use http::HttpSourceAdapter;

use async_trait::async_trait;
use f501_common::models::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Raw season row as returned by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRow {
    pub season: String,
    pub team: String,
    pub competition: String,
    #[serde(default)]
    pub country: Option<String>,
    /// Metric name -> value; names are mapped onto counters at merge time
    #[serde(default)]
    pub metrics: HashMap<String, i64>,
}

/// One roster entry of a league season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub nationality: Option<String>,
    pub team: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub metrics: HashMap<String, i64>,
}

/// Failure of a single source call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Connection failure or unexpected status
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the request timeout
    #[error("Request timed out after {0} s")]
    Timeout(u64),

    /// Response did not have the expected shape
    #[error("Parse mismatch: {0}")]
    ParseMismatch(String),

    /// Source refused the request (blocked, throttled, unavailable)
    #[error("Rejected by source (HTTP {0})")]
    Rejected(u16),

    /// Source has no such entity or roster
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SourceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SourceError::Network(_) => ErrorCategory::Network,
            SourceError::Timeout(_) => ErrorCategory::Timeout,
            SourceError::ParseMismatch(_) => ErrorCategory::ParseMismatch,
            SourceError::Rejected(_) => ErrorCategory::Rejected,
            SourceError::NotFound(_) => ErrorCategory::NotFound,
        }
    }

    /// NotFound is terminal; everything else may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::NotFound(_))
    }
}

/// External statistics source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch all season rows of one entity
    async fn fetch_entity_detail(&self, external_id: &str) -> Result<Vec<SeasonRow>, SourceError>;

    /// Fetch the roster of one league season
    async fn fetch_league_roster(
        &self,
        league: &str,
        season: &str,
    ) -> Result<Vec<RosterRow>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_found_is_terminal() {
        assert!(SourceError::Network("reset".into()).is_retryable());
        assert!(SourceError::Timeout(30).is_retryable());
        assert!(SourceError::ParseMismatch("no table".into()).is_retryable());
        assert!(SourceError::Rejected(429).is_retryable());
        assert!(!SourceError::NotFound("p1".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(SourceError::Rejected(403).category(), ErrorCategory::Rejected);
        assert_eq!(SourceError::Timeout(5).category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_season_row_defaults() {
        let row: SeasonRow = serde_json::from_str(
            r#"{"season":"2023-2024","team":"Arsenal","competition":"Premier League"}"#,
        )
        .unwrap();
        assert!(row.metrics.is_empty());
        assert_eq!(row.country, None);
    }
}
