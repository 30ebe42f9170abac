//! Questions and their computed answers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{Counter, Counters};
use crate::{Error, Result};

/// Statistic a question scores entities on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Single(Counter),
    /// Composite metric, e.g. appearances + goals
    Sum(Counter, Counter),
}

impl Metric {
    /// Parse a metric key
    ///
    /// Single counters use their column name ("goals"); composites join two
    /// names with `+` ("appearances+goals"). The legacy `combined_apps_*` and
    /// `goalkeeper` keys are accepted as aliases.
    pub fn parse(key: &str) -> Result<Metric> {
        let key = key.trim().to_ascii_lowercase();
        match key.as_str() {
            "combined_apps_goals" => return Ok(Metric::Sum(Counter::Appearances, Counter::Goals)),
            "combined_apps_assists" => {
                return Ok(Metric::Sum(Counter::Appearances, Counter::Assists))
            }
            "goalkeeper" => return Ok(Metric::Sum(Counter::Appearances, Counter::CleanSheets)),
            _ => {}
        }

        let unknown = || Error::Config(format!("Unknown metric key '{}'", key));
        match key.split_once('+') {
            Some((left, right)) => {
                let left = Counter::from_metric_name(left).ok_or_else(unknown)?;
                let right = Counter::from_metric_name(right).ok_or_else(unknown)?;
                Ok(Metric::Sum(left, right))
            }
            None => Counter::from_metric_name(&key)
                .map(Metric::Single)
                .ok_or_else(unknown),
        }
    }

    pub fn score(&self, counters: &Counters) -> i64 {
        match self {
            Metric::Single(counter) => counters.get(*counter),
            Metric::Sum(a, b) => counters.get(*a).saturating_add(counters.get(*b)),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Single(c) => f.write_str(c.as_str()),
            Metric::Sum(a, b) => write!(f, "{}+{}", a.as_str(), b.as_str()),
        }
    }
}

/// How matching season records collapse into one score per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Sum across every matching season
    SumAllSeasons,
    /// Each entity's own most recent matching season
    SingleMostRecentSeason,
    /// The most recent season across all matching records; entities without
    /// a record in that season drop out
    LatestSeasonOnly,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::SumAllSeasons => "sum_all_seasons",
            AggregationStrategy::SingleMostRecentSeason => "single_most_recent_season",
            AggregationStrategy::LatestSeasonOnly => "latest_season_only",
        }
    }
}

impl Default for AggregationStrategy {
    fn default() -> Self {
        AggregationStrategy::SumAllSeasons
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum_all_seasons" | "sum" => Ok(AggregationStrategy::SumAllSeasons),
            "single_most_recent_season" | "single_season" => {
                Ok(AggregationStrategy::SingleMostRecentSeason)
            }
            "latest_season_only" | "latest_season" => Ok(AggregationStrategy::LatestSeasonOnly),
            other => Err(Error::Config(format!(
                "Unknown aggregation strategy '{}'",
                other
            ))),
        }
    }
}

/// Filter set of a question; absent fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionFilter {
    pub team: Option<String>,
    pub competition: Option<String>,
    pub season: Option<String>,
    pub nationality: Option<String>,
}

impl QuestionFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.team.is_none()
            && self.competition.is_none()
            && self.season.is_none()
            && self.nationality.is_none()
    }
}

/// Named, filtered, aggregated statistic definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub question_text: String,
    /// Stored as text so a bad key only fails that question's computation
    pub metric_key: String,
    pub filter: QuestionFilter,
    pub aggregation: AggregationStrategy,
    pub min_score: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    pub fn new(question_text: impl Into<String>, metric_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question_text: question_text.into(),
            metric_key: metric_key.into(),
            filter: QuestionFilter::default(),
            aggregation: AggregationStrategy::default(),
            min_score: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metric(&self) -> Result<Metric> {
        Metric::parse(&self.metric_key)
    }
}

/// Scored, classified answer of one entity to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: Uuid,
    pub entity_id: i64,
    pub display_name: String,
    /// Normalized display name; unique per question
    pub answer_key: String,
    pub score: i64,
    pub is_valid: bool,
    pub is_bust: bool,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_composite_metrics() {
        assert_eq!(Metric::parse("goals").unwrap(), Metric::Single(Counter::Goals));
        assert_eq!(
            Metric::parse("appearances+goals").unwrap(),
            Metric::Sum(Counter::Appearances, Counter::Goals)
        );
        assert_eq!(
            Metric::parse("goalkeeper").unwrap(),
            Metric::Sum(Counter::Appearances, Counter::CleanSheets)
        );
    }

    #[test]
    fn test_unknown_metric_is_config_error() {
        assert!(matches!(Metric::parse("xg"), Err(Error::Config(_))));
        assert!(matches!(Metric::parse("goals+xg"), Err(Error::Config(_))));
    }

    #[test]
    fn test_composite_score() {
        let counters = Counters {
            appearances: 30,
            clean_sheets: 12,
            ..Default::default()
        };
        let metric = Metric::parse("appearances+clean_sheets").unwrap();
        assert_eq!(metric.score(&counters), 42);
        assert_eq!(metric.to_string(), "appearances+clean_sheets");
    }

    #[test]
    fn test_composite_score_saturates() {
        let counters = Counters {
            appearances: i64::MAX,
            goals: 10,
            ..Default::default()
        };
        let metric = Metric::parse("appearances+goals").unwrap();
        assert_eq!(metric.score(&counters), i64::MAX);
    }

    #[test]
    fn test_strategy_aliases() {
        assert_eq!(
            "sum".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::SumAllSeasons
        );
        assert_eq!(
            "single_season".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::SingleMostRecentSeason
        );
        assert_eq!(
            "latest_season".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::LatestSeasonOnly
        );
        assert!("median".parse::<AggregationStrategy>().is_err());
    }
}
