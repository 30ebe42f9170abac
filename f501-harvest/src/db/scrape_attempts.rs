//! Per-entity scrape log operations
//!
//! One row per (job, entity). The row with the highest rowid of an entity is
//! that entity's current status.

use f501_common::models::{ErrorCategory, JobCounters, ScrapeAttempt, ScrapeStatus};
use f501_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::utils::retry_on_lock;

/// Stored error messages are cut to this many characters
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

const ATTEMPT_COLUMNS: &str = "job_id, entity_id, status, attempt_count, error_category, \
     error_message, rows_merged, updated_at";

const LATEST_PER_ENTITY: &str = "SELECT MAX(rowid) FROM scrape_attempts GROUP BY entity_id";

/// Terminal result of one entity within one run
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub job_id: Uuid,
    pub entity_id: i64,
    pub status: ScrapeStatus,
    /// True if the source was actually called
    pub fetched: bool,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub rows_merged: u32,
}

/// Record entities as pending for a job
///
/// `entities` pairs each entity id with the attempt count it starts from.
/// Re-enqueueing within the same job resets status but keeps the count.
pub async fn enqueue(
    pool: &SqlitePool,
    job_id: Uuid,
    entities: &[(i64, u32)],
    max_lock_wait_ms: u64,
) -> Result<()> {
    let job_id = job_id.to_string();
    let now = time::to_db(&time::now());

    retry_on_lock("enqueue_attempts", max_lock_wait_ms, || async {
        let mut tx = pool.begin().await?;

        for (entity_id, prior_attempts) in entities {
            sqlx::query(
                r#"
                INSERT INTO scrape_attempts (job_id, entity_id, status, attempt_count, updated_at)
                VALUES (?, ?, 'pending', ?, ?)
                ON CONFLICT(job_id, entity_id) DO UPDATE SET
                    status = 'pending',
                    error_category = NULL,
                    error_message = NULL,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&job_id)
            .bind(*entity_id)
            .bind(*prior_attempts as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Move an entity's attempt to its terminal status for this run
pub async fn record_outcome(
    pool: &SqlitePool,
    outcome: &AttemptOutcome,
    max_lock_wait_ms: u64,
) -> Result<()> {
    let job_id = outcome.job_id.to_string();
    let message = outcome
        .error_message
        .as_deref()
        .map(|m| m.chars().take(MAX_ERROR_MESSAGE_CHARS).collect::<String>());
    let now = time::to_db(&time::now());

    retry_on_lock("record_attempt", max_lock_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE scrape_attempts
            SET status = ?,
                attempt_count = attempt_count + ?,
                error_category = ?,
                error_message = ?,
                rows_merged = ?,
                updated_at = ?
            WHERE job_id = ? AND entity_id = ?
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(if outcome.fetched { 1i64 } else { 0 })
        .bind(outcome.error_category.map(|c| c.as_str()))
        .bind(&message)
        .bind(outcome.rows_merged as i64)
        .bind(&now)
        .bind(&job_id)
        .bind(outcome.entity_id)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

pub async fn load_attempt(
    pool: &SqlitePool,
    job_id: Uuid,
    entity_id: i64,
) -> Result<Option<ScrapeAttempt>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM scrape_attempts WHERE job_id = ? AND entity_id = ?",
        ATTEMPT_COLUMNS
    ))
    .bind(job_id.to_string())
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(attempt_from_row).transpose()
}

/// Attempt counts carried into a new run: the count on each entity's latest row
pub async fn latest_attempt_count(pool: &SqlitePool, entity_id: i64) -> Result<u32> {
    let count: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT attempt_count FROM scrape_attempts
        WHERE entity_id = ?
        ORDER BY rowid DESC
        LIMIT 1
        "#,
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    Ok(count.unwrap_or(0).max(0) as u32)
}

/// Counters of a job derived from its scrape log
pub async fn job_tally(pool: &SqlitePool, job_id: Uuid) -> Result<JobCounters> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(status = 'success'), 0) AS succeeded,
            COALESCE(SUM(status = 'failed'), 0) AS failed,
            COALESCE(SUM(status = 'skipped'), 0) AS skipped,
            COALESCE(SUM(rows_merged), 0) AS rows_written
        FROM scrape_attempts
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(JobCounters {
        total: row.get::<i64, _>("total") as u64,
        succeeded: row.get::<i64, _>("succeeded") as u64,
        failed: row.get::<i64, _>("failed") as u64,
        skipped: row.get::<i64, _>("skipped") as u64,
        rows_written: row.get::<i64, _>("rows_written") as u64,
    })
}

/// Latest attempt of every entity whose current status is `status`
pub async fn latest_with_status(
    pool: &SqlitePool,
    status: ScrapeStatus,
) -> Result<Vec<ScrapeAttempt>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM scrape_attempts
        WHERE rowid IN ({})
          AND status = ?
        ORDER BY entity_id
        "#,
        ATTEMPT_COLUMNS, LATEST_PER_ENTITY
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(attempt_from_row).collect()
}

/// Entities whose latest attempt failed with attempts left
///
/// Returns (entity id, attempts consumed so far).
pub async fn retry_candidates(pool: &SqlitePool, max_attempts: u32) -> Result<Vec<(i64, u32)>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(&format!(
        r#"
        SELECT entity_id, attempt_count FROM scrape_attempts
        WHERE rowid IN ({})
          AND status = 'failed'
          AND attempt_count < ?
        ORDER BY entity_id
        "#,
        LATEST_PER_ENTITY
    ))
    .bind(max_attempts as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(entity_id, count)| (entity_id, count.max(0) as u32))
        .collect())
}

/// Entity counts by current status
pub async fn status_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as(&format!(
        r#"
        SELECT status, COUNT(*) AS n FROM scrape_attempts
        WHERE rowid IN ({})
        GROUP BY status
        ORDER BY n DESC, status
        "#,
        LATEST_PER_ENTITY
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most common error categories among currently failed entities
pub async fn error_breakdown(pool: &SqlitePool, limit: u32) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as(&format!(
        r#"
        SELECT COALESCE(error_category, 'unknown') AS category, COUNT(*) AS n
        FROM scrape_attempts
        WHERE rowid IN ({})
          AND status = 'failed'
        GROUP BY category
        ORDER BY n DESC, category
        LIMIT ?
        "#,
        LATEST_PER_ENTITY
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

fn attempt_from_row(row: &SqliteRow) -> Result<ScrapeAttempt> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job id: {}", e)))?;
    let status: String = row.get("status");
    let error_category: Option<String> = row.get("error_category");
    let updated_at: String = row.get("updated_at");

    Ok(ScrapeAttempt {
        job_id,
        entity_id: row.get("entity_id"),
        status: status.parse::<ScrapeStatus>()?,
        attempt_count: row.get::<i64, _>("attempt_count").max(0) as u32,
        error_category: error_category
            .map(|c| c.parse::<ErrorCategory>())
            .transpose()?,
        error_message: row.get("error_message"),
        rows_merged: row.get::<i64, _>("rows_merged").max(0) as u32,
        updated_at: time::from_db(&updated_at)?,
    })
}
