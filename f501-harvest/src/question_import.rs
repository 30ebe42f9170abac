//! Question definitions from TOML
//!
//! ```toml
//! [[question]]
//! text = "Premier League appearances for Arsenal"
//! metric = "appearances"
//! team = "Arsenal"
//! competition = "Premier League"
//! aggregation = "sum_all_seasons"
//! min_score = 1
//! ```
//!
//! Questions are matched by text: importing the same file twice updates the
//! existing questions instead of adding new ones.

use chrono::Utc;
use f501_common::models::{AggregationStrategy, Question, QuestionFilter};
use f501_common::Error;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

use crate::db::questions;
use crate::error::{HarvestError, HarvestResult};

/// One `[[question]]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuestionEntry {
    pub text: String,
    pub metric: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub competition: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub min_score: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct QuestionFile {
    #[serde(default)]
    question: Vec<QuestionEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
}

/// Parse a question file's contents
pub fn parse_questions(contents: &str) -> HarvestResult<Vec<QuestionEntry>> {
    let file: QuestionFile = toml::from_str(contents).map_err(Error::from)?;

    for (index, entry) in file.question.iter().enumerate() {
        if entry.text.trim().is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Question #{} has no text",
                index + 1
            )));
        }
        if entry.metric.trim().is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Question '{}' has no metric",
                entry.text
            )));
        }
    }

    Ok(file.question)
}

impl QuestionEntry {
    fn filter(&self) -> QuestionFilter {
        QuestionFilter {
            team: self.team.clone(),
            competition: self.competition.clone(),
            season: self.season.clone(),
            nationality: self.nationality.clone(),
        }
    }

    fn strategy(&self) -> HarvestResult<AggregationStrategy> {
        match self.aggregation.as_deref() {
            None => Ok(AggregationStrategy::default()),
            Some(name) => Ok(name.parse::<AggregationStrategy>()?),
        }
    }

    /// Apply this entry onto an existing question, or build a new one
    fn into_question(self, existing: Option<Question>) -> HarvestResult<Question> {
        let aggregation = self.strategy()?;
        let filter = self.filter();
        let mut question = existing.unwrap_or_else(|| Question::new(self.text.trim(), ""));

        question.metric_key = self.metric.trim().to_string();
        question.filter = filter;
        question.aggregation = aggregation;
        question.min_score = self.min_score;
        question.is_active = self.active;
        question.updated_at = Utc::now();
        Ok(question)
    }
}

/// Create or update questions from parsed entries
pub async fn import_entries(
    pool: &SqlitePool,
    entries: Vec<QuestionEntry>,
) -> HarvestResult<ImportSummary> {
    let mut summary = ImportSummary::default();

    for entry in entries {
        let existing = questions::find_by_text(pool, entry.text.trim()).await?;
        let is_new = existing.is_none();
        let question = entry.into_question(existing)?;

        if let Err(e) = question.metric() {
            warn!(question = %question.question_text, error = %e, "Question imported with an unknown metric");
        }

        questions::save_question(pool, &question).await?;
        if is_new {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
    }

    Ok(summary)
}

/// Import every question of a TOML file
pub async fn import_file(pool: &SqlitePool, path: &Path) -> HarvestResult<ImportSummary> {
    let contents = std::fs::read_to_string(path).map_err(Error::from)?;
    let entries = parse_questions(&contents)?;
    let summary = import_entries(pool, entries).await?;

    info!(
        path = %path.display(),
        created = summary.created,
        updated = summary.updated,
        "Questions imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let entries = parse_questions(
            r#"
            [[question]]
            text = "Goals for Chelsea"
            metric = "goals"
            team = "Chelsea"
            "#,
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].active);
        assert_eq!(entries[0].aggregation, None);
        assert_eq!(entries[0].strategy().unwrap(), AggregationStrategy::SumAllSeasons);
    }

    #[test]
    fn test_blank_text_rejected() {
        let result = parse_questions(
            r#"
            [[question]]
            text = "  "
            metric = "goals"
            "#,
        );
        assert!(matches!(result, Err(HarvestError::Configuration(_))));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let entry = QuestionEntry {
            text: "x".to_string(),
            metric: "goals".to_string(),
            team: None,
            competition: None,
            season: None,
            nationality: None,
            aggregation: Some("median".to_string()),
            min_score: None,
            active: true,
        };
        assert!(entry.into_question(None).is_err());
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_questions("").unwrap().is_empty());
    }
}
