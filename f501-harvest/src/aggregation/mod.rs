//! Aggregation Engine
//!
//! Turns stored season records into the answer set of a question:
//! filter -> group by entity -> collapse seasons -> score -> threshold ->
//! classify -> deduplicate by normalized name -> replace the stored set.
//!
//! Entities are processed in creation order and their records in insertion
//! order; that order decides which entity keeps a shared normalized name.

pub mod filter;
pub mod scoring;

use chrono::{DateTime, Utc};
use f501_common::models::{
    AggregationStrategy, Answer, Counters, JobCounters, JobType, Metric, Question, SeasonOrder,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::seasons::CandidateRecord;
use crate::db::{answers, questions, seasons};
use crate::error::{HarvestError, HarvestResult};
use crate::ledger::JobLedger;
pub use filter::{FilterPlan, Predicate};

/// Result of recomputing one question
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnswerSetSummary {
    pub question_id: Uuid,
    /// Entities with at least one matching record
    pub entities_matched: usize,
    pub answers_written: usize,
    /// Dropped for a non-positive score or below the minimum score
    pub below_threshold: usize,
    /// Dropped because an earlier entity had the same normalized name
    pub duplicates: usize,
}

/// Result of recomputing every active question
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub job_id: Uuid,
    pub summaries: Vec<AnswerSetSummary>,
    /// (question id, error) for questions that could not be computed
    pub failures: Vec<(Uuid, String)>,
}

/// Matching records of one entity, in record order
struct EntityGroup<'a> {
    entity_id: i64,
    display_name: &'a str,
    normalized_name: &'a str,
    records: Vec<&'a CandidateRecord>,
}

/// Group matching candidates by entity, preserving first-seen order
fn group_by_entity<'a>(
    candidates: &'a [CandidateRecord],
    plan: &FilterPlan,
) -> Vec<EntityGroup<'a>> {
    let mut groups: Vec<EntityGroup<'a>> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for candidate in candidates.iter().filter(|c| plan.matches(c)) {
        let entity_id = candidate.record.entity_id;
        let slot = *index.entry(entity_id).or_insert_with(|| {
            groups.push(EntityGroup {
                entity_id,
                display_name: &candidate.display_name,
                normalized_name: &candidate.normalized_name,
                records: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].records.push(candidate);
    }

    groups
}

/// First record of the greatest season span, or `None` for no records
fn most_recent<'a>(
    records: impl IntoIterator<Item = &'a CandidateRecord>,
) -> Option<&'a CandidateRecord> {
    let mut best: Option<(&CandidateRecord, (i32, i32))> = None;
    for record in records {
        let span = SeasonOrder::parse(&record.record.season).span();
        // Strictly greater: ties keep the first-seen record
        if best.map_or(true, |(_, best_span)| span > best_span) {
            best = Some((record, span));
        }
    }
    best.map(|(record, _)| record)
}

/// Collapse each entity's records into the counters its score is taken from
fn collapse(
    groups: &[EntityGroup<'_>],
    strategy: AggregationStrategy,
) -> Vec<(usize, Counters)> {
    match strategy {
        AggregationStrategy::SumAllSeasons => groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let total = g
                    .records
                    .iter()
                    .fold(Counters::default(), |acc, r| acc.add(&r.record.counters));
                (i, total)
            })
            .collect(),
        AggregationStrategy::SingleMostRecentSeason => groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                most_recent(g.records.iter().copied()).map(|r| (i, r.record.counters))
            })
            .collect(),
        AggregationStrategy::LatestSeasonOnly => {
            let latest = most_recent(groups.iter().flat_map(|g| g.records.iter().copied()))
                .map(|r| SeasonOrder::parse(&r.record.season).span());
            let Some(latest) = latest else {
                return Vec::new();
            };

            groups
                .iter()
                .enumerate()
                .filter_map(|(i, g)| {
                    g.records
                        .iter()
                        .find(|r| SeasonOrder::parse(&r.record.season).span() == latest)
                        .map(|r| (i, r.record.counters))
                })
                .collect()
        }
    }
}

/// Build the answer set of a question from candidate records
///
/// Pure: no storage access. `candidates` must be in entity creation order,
/// then record order.
pub fn build_answers(
    question: &Question,
    metric: Metric,
    candidates: &[CandidateRecord],
    computed_at: DateTime<Utc>,
) -> (Vec<Answer>, AnswerSetSummary) {
    let plan = FilterPlan::compile(&question.filter);
    let groups = group_by_entity(candidates, &plan);
    let collapsed = collapse(&groups, question.aggregation);

    let mut summary = AnswerSetSummary {
        question_id: question.id,
        entities_matched: groups.len(),
        ..Default::default()
    };
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut answers = Vec::new();

    for (index, counters) in collapsed {
        let group = &groups[index];
        let score = metric.score(&counters);

        if score <= 0 || question.min_score.is_some_and(|min| score < min) {
            summary.below_threshold += 1;
            continue;
        }

        let answer_key = if group.normalized_name.is_empty() {
            format!("#{}", group.entity_id)
        } else {
            group.normalized_name.to_string()
        };
        if !seen_keys.insert(answer_key.clone()) {
            debug!(
                question_id = %question.id,
                entity_id = group.entity_id,
                answer_key = %answer_key,
                "Dropping duplicate normalized name"
            );
            summary.duplicates += 1;
            continue;
        }

        let class = scoring::classify(score);
        answers.push(Answer {
            question_id: question.id,
            entity_id: group.entity_id,
            display_name: group.display_name.to_string(),
            answer_key,
            score,
            is_valid: class.is_valid,
            is_bust: class.is_bust,
            computed_at,
        });
    }

    summary.answers_written = answers.len();
    (answers, summary)
}

/// Recompute and store one question's answers, without a job
pub(crate) async fn compute_question(
    pool: &SqlitePool,
    question: &Question,
    max_lock_wait_ms: u64,
) -> HarvestResult<AnswerSetSummary> {
    let metric = question
        .metric()
        .map_err(|e| HarvestError::Configuration(format!("Question {}: {}", question.id, e)))?;

    let plan = FilterPlan::compile(&question.filter);
    let candidates =
        seasons::load_candidates(pool, plan.team_key(), plan.competition_key()).await?;

    let (answer_set, summary) = build_answers(question, metric, &candidates, Utc::now());
    answers::replace_answers(pool, question.id, &answer_set, max_lock_wait_ms).await?;

    info!(
        question_id = %question.id,
        metric = %metric,
        aggregation = %question.aggregation,
        matched = summary.entities_matched,
        answers = summary.answers_written,
        below_threshold = summary.below_threshold,
        duplicates = summary.duplicates,
        "Answer set replaced"
    );
    Ok(summary)
}

/// Recompute one question under its own aggregation job
pub async fn compute_answers(
    pool: &SqlitePool,
    ledger: &JobLedger,
    question_id: Uuid,
    max_lock_wait_ms: u64,
) -> HarvestResult<AnswerSetSummary> {
    let question = questions::load_question(pool, question_id)
        .await?
        .ok_or_else(|| HarvestError::NotFound(format!("question {}", question_id)))?;

    let mut job = ledger
        .open(JobType::Aggregation, format!("question {}", question_id))
        .await?;
    let _alive = ledger.keep_alive(&job);

    match compute_question(pool, &question, max_lock_wait_ms).await {
        Ok(summary) => {
            let counters = JobCounters {
                total: 1,
                succeeded: 1,
                rows_written: summary.answers_written as u64,
                ..Default::default()
            };
            ledger.complete(&mut job, counters, false).await?;
            Ok(summary)
        }
        Err(err) => {
            ledger.abort(&mut job, err.to_string()).await?;
            Err(err)
        }
    }
}

/// Recompute every active question under one aggregation job
///
/// A question that fails (bad metric key, storage error) is counted and
/// reported; the others still run.
pub async fn compute_all_active_answers(
    pool: &SqlitePool,
    ledger: &JobLedger,
    max_lock_wait_ms: u64,
) -> HarvestResult<AggregationReport> {
    let active = questions::list_questions(pool, true).await?;
    let mut job = ledger
        .open(
            JobType::Aggregation,
            format!("{} active questions", active.len()),
        )
        .await?;
    let _alive = ledger.keep_alive(&job);

    let mut counters = JobCounters {
        total: active.len() as u64,
        ..Default::default()
    };
    let mut summaries = Vec::with_capacity(active.len());
    let mut failures = Vec::new();

    for question in &active {
        match compute_question(pool, question, max_lock_wait_ms).await {
            Ok(summary) => {
                counters.succeeded += 1;
                counters.rows_written += summary.answers_written as u64;
                summaries.push(summary);
            }
            Err(err) => {
                warn!(question_id = %question.id, error = %err, "Question failed to compute");
                counters.failed += 1;
                failures.push((question.id, err.to_string()));
            }
        }
    }

    ledger.complete(&mut job, counters, false).await?;

    Ok(AggregationReport {
        job_id: job.id,
        summaries,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use f501_common::models::{QuestionFilter, SeasonRecord};

    fn record(
        record_id: i64,
        entity_id: i64,
        name: &str,
        season: &str,
        team: &str,
        appearances: i64,
    ) -> CandidateRecord {
        CandidateRecord {
            record: SeasonRecord {
                id: record_id,
                entity_id,
                season: season.to_string(),
                team: team.to_string(),
                competition: "Premier League".to_string(),
                country: None,
                counters: Counters {
                    appearances,
                    ..Default::default()
                },
                updated_at: Utc::now(),
            },
            display_name: name.to_string(),
            normalized_name: f501_common::normalize_name(name),
            nationality: None,
        }
    }

    fn question(aggregation: AggregationStrategy) -> Question {
        let mut q = Question::new("Appearances for Team A", "appearances");
        q.aggregation = aggregation;
        q
    }

    fn scores(answers: &[Answer]) -> Vec<(i64, i64)> {
        answers.iter().map(|a| (a.entity_id, a.score)).collect()
    }

    #[test]
    fn test_sum_versus_latest_season() {
        let candidates = vec![
            record(1, 1, "Player One", "2022", "Team A", 10),
            record(2, 1, "Player One", "2023", "Team A", 20),
        ];
        let metric = Metric::parse("appearances").unwrap();

        let (sum, _) = build_answers(
            &question(AggregationStrategy::SumAllSeasons),
            metric,
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&sum), vec![(1, 30)]);

        for strategy in [
            AggregationStrategy::SingleMostRecentSeason,
            AggregationStrategy::LatestSeasonOnly,
        ] {
            let (latest, _) = build_answers(&question(strategy), metric, &candidates, Utc::now());
            assert_eq!(scores(&latest), vec![(1, 20)], "{:?}", strategy);
        }
    }

    #[test]
    fn test_huge_counters_saturate_into_bust() {
        let candidates = vec![
            record(1, 1, "Record Holder", "2022", "Team A", i64::MAX),
            record(2, 1, "Record Holder", "2023", "Team A", i64::MAX),
        ];
        let (answers, _) = build_answers(
            &question(AggregationStrategy::SumAllSeasons),
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&answers), vec![(1, i64::MAX)]);
        assert!(answers[0].is_bust);
        assert!(!answers[0].is_valid);
    }

    #[test]
    fn test_latest_season_only_uses_global_latest() {
        let candidates = vec![
            record(1, 1, "Old Timer", "2021-2022", "Team A", 30),
            record(2, 2, "Current Player", "2022-2023", "Team A", 12),
            record(3, 2, "Current Player", "2023-2024", "Team A", 15),
        ];
        let metric = Metric::parse("appearances").unwrap();

        let (single, _) = build_answers(
            &question(AggregationStrategy::SingleMostRecentSeason),
            metric,
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&single), vec![(1, 30), (2, 15)]);

        let (latest, _) = build_answers(
            &question(AggregationStrategy::LatestSeasonOnly),
            metric,
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&latest), vec![(2, 15)]);
    }

    #[test]
    fn test_same_season_tie_keeps_first_record() {
        let candidates = vec![
            record(1, 1, "Loan Player", "2023-2024", "Team A", 8),
            record(2, 1, "Loan Player", "2023-24", "Team B", 11),
        ];
        let (answers, _) = build_answers(
            &question(AggregationStrategy::SingleMostRecentSeason),
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&answers), vec![(1, 8)]);
    }

    #[test]
    fn test_dedup_by_normalized_name_first_wins() {
        let candidates = vec![
            record(1, 1, "J. Smith", "2023", "Team A", 40),
            record(2, 2, "J Smith", "2023", "Team A", 55),
        ];
        let (answers, summary) = build_answers(
            &question(AggregationStrategy::SumAllSeasons),
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].entity_id, 1);
        assert_eq!(answers[0].answer_key, "j smith");
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn test_threshold_and_non_positive_dropped() {
        let candidates = vec![
            record(1, 1, "Zero Apps", "2023", "Team A", 0),
            record(2, 2, "Few Apps", "2023", "Team A", 3),
            record(3, 3, "Many Apps", "2023", "Team A", 34),
        ];
        let mut q = question(AggregationStrategy::SumAllSeasons);
        q.min_score = Some(5);

        let (answers, summary) = build_answers(
            &q,
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );
        assert_eq!(scores(&answers), vec![(3, 34)]);
        assert_eq!(summary.below_threshold, 2);
        assert!(answers[0].is_valid);
        assert!(!answers[0].is_bust);
    }

    #[test]
    fn test_filter_on_missing_team_yields_empty_set() {
        let candidates = vec![record(1, 1, "Player One", "2023", "Team A", 10)];
        let mut q = question(AggregationStrategy::SumAllSeasons);
        q.filter = QuestionFilter {
            team: Some("Dissolved FC".to_string()),
            ..Default::default()
        };

        let (answers, summary) = build_answers(
            &q,
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );
        assert!(answers.is_empty());
        assert_eq!(summary.entities_matched, 0);
    }

    #[test]
    fn test_classification_applied() {
        let candidates = vec![
            record(1, 1, "Valid", "2023", "Team A", 31),
            record(2, 2, "Unreachable", "2023", "Team A", 163),
            record(3, 3, "Bust", "2023", "Team A", 200),
        ];
        let (answers, _) = build_answers(
            &question(AggregationStrategy::SumAllSeasons),
            Metric::parse("appearances").unwrap(),
            &candidates,
            Utc::now(),
        );

        let flags: Vec<(i64, bool, bool)> = answers
            .iter()
            .map(|a| (a.score, a.is_valid, a.is_bust))
            .collect();
        assert_eq!(
            flags,
            vec![(31, true, false), (163, false, false), (200, false, true)]
        );
    }
}
