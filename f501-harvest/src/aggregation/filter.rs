//! Question filters as typed predicates
//!
//! A question's filter set compiles into a list of predicates combined with
//! AND. Team and competition predicates are also pushed down into the SQL
//! candidate query; season and nationality are evaluated in memory.

use f501_common::models::{same_season, QuestionFilter};
use f501_common::normalize::{normalize_name, normalize_optional};

use crate::db::seasons::CandidateRecord;

/// One filter condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Normalized team name
    Team(String),
    /// Normalized competition name
    Competition(String),
    /// Season label; "2023-24" and "2023-2024" match
    Season(String),
    /// Normalized nationality of the owning entity
    Nationality(String),
}

impl Predicate {
    pub fn matches(&self, candidate: &CandidateRecord) -> bool {
        match self {
            Predicate::Team(key) => normalize_name(&candidate.record.team) == *key,
            Predicate::Competition(key) => normalize_name(&candidate.record.competition) == *key,
            Predicate::Season(label) => same_season(&candidate.record.season, label),
            Predicate::Nationality(key) => candidate
                .nationality
                .as_deref()
                .map(normalize_name)
                .is_some_and(|n| n == *key),
        }
    }
}

/// Compiled filter set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPlan {
    predicates: Vec<Predicate>,
}

impl FilterPlan {
    /// Compile a filter set; blank values count as absent
    pub fn compile(filter: &QuestionFilter) -> Self {
        let mut predicates = Vec::new();

        if let Some(team) = normalize_optional(filter.team.as_deref()) {
            predicates.push(Predicate::Team(team));
        }
        if let Some(competition) = normalize_optional(filter.competition.as_deref()) {
            predicates.push(Predicate::Competition(competition));
        }
        if let Some(season) = filter.season.as_deref().map(str::trim) {
            if !season.is_empty() {
                predicates.push(Predicate::Season(season.to_string()));
            }
        }
        if let Some(nationality) = normalize_optional(filter.nationality.as_deref()) {
            predicates.push(Predicate::Nationality(nationality));
        }

        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Team key for the SQL candidate query
    pub fn team_key(&self) -> Option<&str> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Team(key) => Some(key.as_str()),
            _ => None,
        })
    }

    /// Competition key for the SQL candidate query
    pub fn competition_key(&self) -> Option<&str> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Competition(key) => Some(key.as_str()),
            _ => None,
        })
    }

    /// True if every predicate holds
    pub fn matches(&self, candidate: &CandidateRecord) -> bool {
        self.predicates.iter().all(|p| p.matches(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use f501_common::models::{Counters, SeasonRecord};

    fn candidate(season: &str, team: &str, nationality: Option<&str>) -> CandidateRecord {
        CandidateRecord {
            record: SeasonRecord {
                id: 1,
                entity_id: 1,
                season: season.to_string(),
                team: team.to_string(),
                competition: "Premier League".to_string(),
                country: Some("England".to_string()),
                counters: Counters::default(),
                updated_at: Utc::now(),
            },
            display_name: "Martin Ødegaard".to_string(),
            normalized_name: "martin ødegaard".to_string(),
            nationality: nationality.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let plan = FilterPlan::compile(&QuestionFilter::default());
        assert!(plan.predicates().is_empty());
        assert!(plan.matches(&candidate("2023-2024", "Arsenal", None)));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let plan = FilterPlan::compile(&QuestionFilter {
            team: Some("  ".to_string()),
            season: Some("".to_string()),
            ..Default::default()
        });
        assert!(plan.predicates().is_empty());
    }

    #[test]
    fn test_predicates_combine_with_and() {
        let plan = FilterPlan::compile(&QuestionFilter {
            team: Some("ARSENAL".to_string()),
            season: Some("2023-24".to_string()),
            nationality: Some("Norway".to_string()),
            ..Default::default()
        });
        assert_eq!(plan.team_key(), Some("arsenal"));
        assert_eq!(plan.competition_key(), None);

        assert!(plan.matches(&candidate("2023-2024", "Arsenal", Some("norway"))));
        assert!(!plan.matches(&candidate("2022-2023", "Arsenal", Some("Norway"))));
        assert!(!plan.matches(&candidate("2023-2024", "Arsenal", None)));
        assert!(!plan.matches(&candidate("2023-2024", "Chelsea", Some("Norway"))));
    }
}
