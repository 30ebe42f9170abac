//! Job ledger database operations

use chrono::{DateTime, Utc};
use f501_common::models::{Job, JobCounters, JobStatus, JobType};
use f501_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::utils::retry_on_lock;

const JOB_COLUMNS: &str = "id, job_type, scope, status, items_total, items_succeeded, \
     items_failed, items_skipped, rows_written, error_message, started_at, ended_at";

/// Save a job (insert or update by id)
pub async fn save_job(pool: &SqlitePool, job: &Job, max_lock_wait_ms: u64) -> Result<()> {
    let id = job.id.to_string();
    let started_at = time::to_db(&job.started_at);
    let ended_at = job.ended_at.as_ref().map(time::to_db);
    let heartbeat_at = time::to_db(&time::now());

    retry_on_lock("save_job", max_lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, scope, status, items_total, items_succeeded,
                items_failed, items_skipped, rows_written, error_message,
                started_at, ended_at, heartbeat_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                items_total = excluded.items_total,
                items_succeeded = excluded.items_succeeded,
                items_failed = excluded.items_failed,
                items_skipped = excluded.items_skipped,
                rows_written = excluded.rows_written,
                error_message = excluded.error_message,
                ended_at = excluded.ended_at,
                heartbeat_at = excluded.heartbeat_at
            "#,
        )
        .bind(&id)
        .bind(job.job_type.as_str())
        .bind(&job.scope)
        .bind(job.status.as_str())
        .bind(job.counters.total as i64)
        .bind(job.counters.succeeded as i64)
        .bind(job.counters.failed as i64)
        .bind(job.counters.skipped as i64)
        .bind(job.counters.rows_written as i64)
        .bind(&job.error_message)
        .bind(&started_at)
        .bind(&ended_at)
        .bind(&heartbeat_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recently started running job of any harvest kind
pub async fn find_running_harvest(pool: &SqlitePool) -> Result<Option<Job>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM jobs
        WHERE status = 'running' AND job_type != 'aggregation'
        ORDER BY started_at DESC
        LIMIT 1
        "#,
        JOB_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recently started jobs, newest first
pub async fn recent_jobs(pool: &SqlitePool, limit: u32) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM jobs ORDER BY started_at DESC LIMIT ?",
        JOB_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Record that the process driving a running job is still alive
pub async fn touch_heartbeat(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE jobs SET heartbeat_at = ? WHERE id = ? AND status = 'running'")
        .bind(time::to_db(&time::now()))
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Close running jobs whose heartbeat stopped at or before `cutoff`
///
/// Nothing drives such a job any more, so it can never finish. Returns the
/// number of jobs closed.
pub async fn cleanup_stale_jobs(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed',
            ended_at = ?,
            error_message = 'Process exited before the job finished'
        WHERE status = 'running'
          AND (heartbeat_at IS NULL OR heartbeat_at <= ?)
        "#,
    )
    .bind(time::to_db(&time::now()))
    .bind(time::to_db(&cutoff))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse job id: {}", e)))?;
    let job_type: String = row.get("job_type");
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    Ok(Job {
        id,
        job_type: job_type.parse::<JobType>()?,
        scope: row.get("scope"),
        status: status.parse::<JobStatus>()?,
        counters: JobCounters {
            total: row.get::<i64, _>("items_total") as u64,
            succeeded: row.get::<i64, _>("items_succeeded") as u64,
            failed: row.get::<i64, _>("items_failed") as u64,
            skipped: row.get::<i64, _>("items_skipped") as u64,
            rows_written: row.get::<i64, _>("rows_written") as u64,
        },
        error_message: row.get("error_message"),
        started_at: time::from_db(&started_at)?,
        ended_at: time::from_db_opt(ended_at.as_deref())?,
    })
}
