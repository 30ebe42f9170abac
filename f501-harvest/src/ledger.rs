//! Job ledger and scrape log reporting
//!
//! Every harvesting or aggregation run is a [`Job`]: opened `running`, closed
//! `success`, `partial` or `failed`. Only one harvest-type job may be running
//! at a time; aggregation jobs are not restricted.
//!
//! A running job refreshes its heartbeat while its process lives. Jobs whose
//! heartbeat went quiet are orphans of a dead process and get closed `failed`.

use f501_common::models::{Job, JobCounters, JobType, ScrapeAttempt, ScrapeStatus};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{entities, jobs, scrape_attempts, seasons};
use crate::error::{HarvestError, HarvestResult};

/// Number of recent jobs shown in the status summary
const RECENT_JOBS: u32 = 5;
/// Number of error categories shown in the status summary
const TOP_ERRORS: u32 = 5;
/// How often a running job records that its process is alive
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Running jobs silent for this long are considered orphaned
pub const STALE_AFTER_SECS: i64 = 300;

/// Opens, updates and closes jobs
#[derive(Clone)]
pub struct JobLedger {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl JobLedger {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Open a new running job
    ///
    /// Refuses to open a harvest-type job while another one is running. The
    /// jobs table carries a unique index over running harvest-kind jobs, so
    /// two processes racing past the lookup still get one job between them.
    pub async fn open(&self, job_type: JobType, scope: impl Into<String>) -> HarvestResult<Job> {
        if job_type.is_harvest_kind() {
            if let Some(running) = jobs::find_running_harvest(&self.pool).await? {
                return Err(refuse(job_type, &running));
            }
        }

        let job = Job::new(job_type, scope);
        if let Err(e) = jobs::save_job(&self.pool, &job, self.max_lock_wait_ms).await {
            if job_type.is_harvest_kind() && e.is_unique_violation() {
                if let Some(running) = jobs::find_running_harvest(&self.pool).await? {
                    return Err(refuse(job_type, &running));
                }
            }
            return Err(e.into());
        }
        info!(job_id = %job.id, job_type = %job.job_type, scope = %job.scope, "Job started");
        Ok(job)
    }

    /// Close a job that reached the end of its work list
    pub async fn complete(
        &self,
        job: &mut Job,
        counters: JobCounters,
        interrupted: bool,
    ) -> HarvestResult<()> {
        job.complete(counters, interrupted);
        self.persist_close(job).await
    }

    /// Close a job that was aborted
    pub async fn abort(&self, job: &mut Job, message: impl Into<String>) -> HarvestResult<()> {
        job.abort(message);
        self.persist_close(job).await
    }

    async fn persist_close(&self, job: &Job) -> HarvestResult<()> {
        jobs::save_job(&self.pool, job, self.max_lock_wait_ms).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            total = job.counters.total,
            succeeded = job.counters.succeeded,
            failed = job.counters.failed,
            skipped = job.counters.skipped,
            rows_written = job.counters.rows_written,
            duration_secs = job.duration_seconds().unwrap_or_default(),
            "Job finished"
        );
        Ok(())
    }

    /// Keep a running job's heartbeat fresh until the guard is dropped
    pub fn keep_alive(&self, job: &Job) -> DropGuard {
        let token = CancellationToken::new();
        let stopped = token.clone();
        let pool = self.pool.clone();
        let job_id = job.id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                        if let Err(e) = jobs::touch_heartbeat(&pool, job_id).await {
                            warn!(%job_id, error = %e, "Failed to record job heartbeat");
                        }
                    }
                }
            }
            debug!(%job_id, "Heartbeat stopped");
        });

        token.drop_guard()
    }

    /// Close jobs whose process stopped sending heartbeats
    pub async fn cleanup_stale(&self) -> HarvestResult<usize> {
        self.cleanup_silent_for(chrono::Duration::seconds(STALE_AFTER_SECS))
            .await
    }

    /// Close running jobs without a heartbeat for at least `silence`
    pub async fn cleanup_silent_for(&self, silence: chrono::Duration) -> HarvestResult<usize> {
        let cutoff = chrono::Utc::now() - silence;
        let closed = jobs::cleanup_stale_jobs(&self.pool, cutoff).await?;
        if closed > 0 {
            warn!(closed, "Closed stale running jobs from a previous process");
        }
        Ok(closed)
    }

    pub async fn load(&self, job_id: Uuid) -> HarvestResult<Option<Job>> {
        Ok(jobs::load_job(&self.pool, job_id).await?)
    }
}

fn refuse(job_type: JobType, running: &Job) -> HarvestError {
    warn!(
        running_job = %running.id,
        running_type = %running.job_type,
        "Refusing to start {} while another harvest job is running",
        job_type
    );
    HarvestError::RunInProgress(running.id)
}

/// Failed entity with its identity, for the failed-entity export
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntity {
    pub entity_id: i64,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub attempt_count: u32,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub last_attempt_at: chrono::DateTime<chrono::Utc>,
}

/// Overview of store contents, scrape status and recent runs
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub entities: i64,
    pub season_records: i64,
    /// Entity count by latest scrape status
    pub by_status: Vec<(String, i64)>,
    /// Most common error categories among failed entities
    pub top_errors: Vec<(String, i64)>,
    pub pending: usize,
    pub recent_jobs: Vec<Job>,
}

pub async fn status_summary(pool: &SqlitePool) -> HarvestResult<StatusSummary> {
    Ok(StatusSummary {
        entities: entities::count_entities(pool).await?,
        season_records: seasons::count_season_records(pool).await?,
        by_status: scrape_attempts::status_counts(pool).await?,
        top_errors: scrape_attempts::error_breakdown(pool, TOP_ERRORS).await?,
        pending: scrape_attempts::latest_with_status(pool, ScrapeStatus::Pending)
            .await?
            .len(),
        recent_jobs: jobs::recent_jobs(pool, RECENT_JOBS).await?,
    })
}

/// Entities whose latest attempt failed, including those out of attempts
pub async fn failed_entities(pool: &SqlitePool) -> HarvestResult<Vec<FailedEntity>> {
    let attempts = scrape_attempts::latest_with_status(pool, ScrapeStatus::Failed).await?;
    let mut failed = Vec::with_capacity(attempts.len());

    for attempt in attempts {
        let entity = entities::load_entity(pool, attempt.entity_id).await?;
        failed.push(FailedEntity {
            entity_id: attempt.entity_id,
            external_id: entity.as_ref().map(|e| e.external_id.clone()),
            display_name: entity.map(|e| e.display_name),
            attempt_count: attempt.attempt_count,
            error_category: attempt.error_category.map(|c| c.to_string()),
            error_message: attempt.error_message,
            last_attempt_at: attempt.updated_at,
        });
    }

    Ok(failed)
}

/// Entities enqueued by a run that never got to them
pub async fn pending_entities(pool: &SqlitePool) -> HarvestResult<Vec<ScrapeAttempt>> {
    Ok(scrape_attempts::latest_with_status(pool, ScrapeStatus::Pending).await?)
}
