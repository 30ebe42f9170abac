//! Tracked entities (players) and their season records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Counter column selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Appearances,
    Goals,
    Assists,
    /// Secondary metric: clean sheets for goalkeepers
    CleanSheets,
    Minutes,
}

impl Counter {
    pub const ALL: [Counter; 5] = [
        Counter::Appearances,
        Counter::Goals,
        Counter::Assists,
        Counter::CleanSheets,
        Counter::Minutes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::Appearances => "appearances",
            Counter::Goals => "goals",
            Counter::Assists => "assists",
            Counter::CleanSheets => "clean_sheets",
            Counter::Minutes => "minutes",
        }
    }

    /// Accepted source spellings, canonical name first
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Counter::Appearances => &["appearances", "apps", "matches", "mp", "games"],
            Counter::Goals => &["goals", "gls"],
            Counter::Assists => &["assists", "ast"],
            Counter::CleanSheets => &["clean_sheets", "cleansheets", "cs", "secondary"],
            Counter::Minutes => &["minutes", "minutes_played", "min"],
        }
    }

    /// Map a source metric name onto a counter
    ///
    /// Sources disagree on naming ("mp", "matches", "minutes_played"), so a
    /// few aliases are accepted. Unknown names return `None`.
    pub fn from_metric_name(name: &str) -> Option<Counter> {
        Self::resolve_metric_name(name).map(|(counter, _)| counter)
    }

    /// Counter plus the alias rank of `name` (0 for the canonical name)
    fn resolve_metric_name(name: &str) -> Option<(Counter, usize)> {
        let folded = name.trim().to_ascii_lowercase();
        Counter::ALL.iter().find_map(|counter| {
            counter
                .aliases()
                .iter()
                .position(|alias| *alias == folded)
                .map(|rank| (*counter, rank))
        })
    }
}

/// Numeric counters of one season record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub appearances: i64,
    pub goals: i64,
    pub assists: i64,
    pub clean_sheets: i64,
    pub minutes: i64,
}

impl Counters {
    pub fn get(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Appearances => self.appearances,
            Counter::Goals => self.goals,
            Counter::Assists => self.assists,
            Counter::CleanSheets => self.clean_sheets,
            Counter::Minutes => self.minutes,
        }
    }

    fn slot(&mut self, counter: Counter) -> &mut i64 {
        match counter {
            Counter::Appearances => &mut self.appearances,
            Counter::Goals => &mut self.goals,
            Counter::Assists => &mut self.assists,
            Counter::CleanSheets => &mut self.clean_sheets,
            Counter::Minutes => &mut self.minutes,
        }
    }

    /// Build counters from a raw source metric map
    ///
    /// Returns the counters plus the metric names that were not recognised.
    /// Negative values are clamped to zero. When several spellings of one
    /// counter are present the canonical name wins, then the alias listed
    /// first, then the raw name in byte order.
    pub fn from_metric_map(metrics: &HashMap<String, i64>) -> (Counters, Vec<String>) {
        let mut counters = Counters::default();
        let mut unknown = Vec::new();
        let mut known = Vec::with_capacity(metrics.len());

        for (name, value) in metrics {
            match Counter::resolve_metric_name(name) {
                Some((counter, rank)) => known.push((counter, rank, name.as_str(), *value)),
                None => unknown.push(name.clone()),
            }
        }

        known.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));
        let mut filled = HashSet::new();
        for (counter, _, _, value) in known {
            if filled.insert(counter) {
                *counters.slot(counter) = value.max(0);
            }
        }

        unknown.sort();
        (counters, unknown)
    }

    /// Field-wise sum, saturating at `i64::MAX`
    pub fn add(&self, other: &Counters) -> Counters {
        Counters {
            appearances: self.appearances.saturating_add(other.appearances),
            goals: self.goals.saturating_add(other.goals),
            assists: self.assists.saturating_add(other.assists),
            clean_sheets: self.clean_sheets.saturating_add(other.clean_sheets),
            minutes: self.minutes.saturating_add(other.minutes),
        }
    }
}

/// Identity of a season record within one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeasonKey {
    pub season: String,
    pub team: String,
    pub competition: String,
}

/// One statistical snapshot for an entity in a season / team / competition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub id: i64,
    pub entity_id: i64,
    /// Season label as published by the source ("2023-2024")
    pub season: String,
    /// Team display name
    pub team: String,
    /// Competition display name
    pub competition: String,
    /// Country of the competition, when the source reports one
    pub country: Option<String>,
    pub counters: Counters,
    pub updated_at: DateTime<Utc>,
}

/// Tracked entity with its season records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Local surrogate key; also the "first seen" order
    pub id: i64,
    /// Stable id at the external source
    pub external_id: String,
    pub display_name: String,
    /// Folded name used for answer deduplication
    pub normalized_name: String,
    pub nationality: Option<String>,
    /// Last successful detail harvest
    pub last_harvested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub seasons: Vec<SeasonRecord>,
}

impl Entity {
    /// True if the entity was harvested within `window` before `now`
    pub fn is_fresh(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_harvested_at {
            Some(at) => now - at < window,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_map_aliases() {
        let mut metrics = HashMap::new();
        metrics.insert("mp".to_string(), 31);
        metrics.insert("Goals".to_string(), 4);
        metrics.insert("minutes_played".to_string(), 2700);
        metrics.insert("xg".to_string(), 3);

        let (counters, unknown) = Counters::from_metric_map(&metrics);
        assert_eq!(counters.appearances, 31);
        assert_eq!(counters.goals, 4);
        assert_eq!(counters.minutes, 2700);
        assert_eq!(counters.assists, 0);
        assert_eq!(unknown, vec!["xg".to_string()]);
    }

    #[test]
    fn test_canonical_metric_name_wins_over_alias() {
        for _ in 0..50 {
            let metrics = HashMap::from([
                ("mp".to_string(), 30),
                ("appearances".to_string(), 31),
                ("games".to_string(), 29),
                ("min".to_string(), 900),
                ("minutes_played".to_string(), 910),
            ]);
            let (counters, unknown) = Counters::from_metric_map(&metrics);
            assert_eq!(counters.appearances, 31);
            assert_eq!(counters.minutes, 910);
            assert!(unknown.is_empty());
        }
    }

    #[test]
    fn test_add_saturates() {
        let big = Counters {
            appearances: i64::MAX,
            goals: 3,
            ..Default::default()
        };
        let sum = big.add(&big);
        assert_eq!(sum.appearances, i64::MAX);
        assert_eq!(sum.goals, 6);
    }

    #[test]
    fn test_negative_metrics_clamped() {
        let mut metrics = HashMap::new();
        metrics.insert("goals".to_string(), -2);
        let (counters, _) = Counters::from_metric_map(&metrics);
        assert_eq!(counters.goals, 0);
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let mut entity = Entity {
            id: 1,
            external_id: "abc".to_string(),
            display_name: "A".to_string(),
            normalized_name: "a".to_string(),
            nationality: None,
            last_harvested_at: None,
            created_at: now,
            updated_at: now,
            seasons: Vec::new(),
        };
        assert!(!entity.is_fresh(chrono::Duration::days(30), now));

        entity.last_harvested_at = Some(now - chrono::Duration::days(3));
        assert!(entity.is_fresh(chrono::Duration::days(30), now));
        assert!(!entity.is_fresh(chrono::Duration::days(2), now));
    }
}
