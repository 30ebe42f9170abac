//! Fixed-size worker pool draining an entity queue
//!
//! Each worker loops: pop entity -> freshness check -> rate gate -> source
//! call under the request timeout -> merge -> record the attempt. The queue
//! is shared, so every entity is dequeued by exactly one worker per pass.
//!
//! Cancellation stops dequeuing; entities already in flight finish and
//! entities never dequeued keep their `pending` attempt row.

use chrono::Utc;
use f501_common::models::{ErrorCategory, ScrapeStatus};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{entities, scrape_attempts};
use crate::db::scrape_attempts::AttemptOutcome;
use crate::merge_store::{MergeError, MergeStore};
use crate::rate_gate::RateGate;
use crate::source::{SourceAdapter, SourceError};

/// Tunables of one pass
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub request_timeout: Duration,
    pub freshness_window: chrono::Duration,
    /// Fetch even if harvested within the freshness window
    pub force: bool,
    pub max_lock_wait_ms: u64,
}

/// What a pass left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    /// Entities never dequeued because the pass was cancelled
    pub left_pending: usize,
}

impl PassReport {
    pub fn interrupted(&self) -> bool {
        self.left_pending > 0
    }
}

/// Shared state of one pass
struct PassState {
    job_id: Uuid,
    store: MergeStore,
    source: Arc<dyn SourceAdapter>,
    gate: Arc<RateGate>,
    settings: PoolSettings,
    queue: Mutex<VecDeque<i64>>,
    total: usize,
    completed: AtomicUsize,
    cancel: CancellationToken,
}

impl PassState {
    fn next_entity(&self) -> Option<i64> {
        match self.queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn remaining(&self) -> usize {
        match self.queue.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn outcome(&self, entity_id: i64, status: ScrapeStatus, fetched: bool) -> AttemptOutcome {
        AttemptOutcome {
            job_id: self.job_id,
            entity_id,
            status,
            fetched,
            error_category: None,
            error_message: None,
            rows_merged: 0,
        }
    }

    fn with_error(
        &self,
        entity_id: i64,
        status: ScrapeStatus,
        fetched: bool,
        category: ErrorCategory,
        message: String,
    ) -> AttemptOutcome {
        AttemptOutcome {
            error_category: Some(category),
            error_message: Some(message),
            ..self.outcome(entity_id, status, fetched)
        }
    }

    /// Harvest one entity; never fails, every path ends in an outcome
    async fn process(&self, entity_id: i64) -> AttemptOutcome {
        let entity = match entities::load_entity(self.store.pool(), entity_id).await {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                return self.with_error(
                    entity_id,
                    ScrapeStatus::Skipped,
                    false,
                    ErrorCategory::UnknownEntity,
                    format!("Entity {} has never been seen", entity_id),
                )
            }
            Err(e) => {
                return self.with_error(
                    entity_id,
                    ScrapeStatus::Failed,
                    false,
                    ErrorCategory::Storage,
                    e.to_string(),
                )
            }
        };

        if !self.settings.force && entity.is_fresh(self.settings.freshness_window, Utc::now()) {
            let harvested = entity
                .last_harvested_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();
            return self.with_error(
                entity_id,
                ScrapeStatus::Skipped,
                false,
                ErrorCategory::Fresh,
                format!("Harvested recently ({})", harvested),
            );
        }

        self.gate.acquire().await;

        let fetched = tokio::time::timeout(
            self.settings.request_timeout,
            self.source.fetch_entity_detail(&entity.external_id),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout(
            self.settings.request_timeout.as_secs(),
        )));

        match fetched {
            Ok(rows) => match self.store.merge_rows(entity_id, &rows).await {
                Ok(merged) => AttemptOutcome {
                    rows_merged: merged as u32,
                    ..self.outcome(entity_id, ScrapeStatus::Success, true)
                },
                Err(err @ MergeError::NoUsableRows { .. }) => self.with_error(
                    entity_id,
                    ScrapeStatus::Failed,
                    true,
                    ErrorCategory::ParseMismatch,
                    err.to_string(),
                ),
                Err(MergeError::Storage(e)) => self.with_error(
                    entity_id,
                    ScrapeStatus::Failed,
                    true,
                    ErrorCategory::Storage,
                    e.to_string(),
                ),
            },
            // Terminal: the source has no such entity
            Err(err @ SourceError::NotFound(_)) => self.with_error(
                entity_id,
                ScrapeStatus::Skipped,
                true,
                err.category(),
                err.to_string(),
            ),
            Err(err) => self.with_error(
                entity_id,
                ScrapeStatus::Failed,
                true,
                err.category(),
                err.to_string(),
            ),
        }
    }
}

async fn run_worker(worker_id: usize, state: Arc<PassState>) {
    debug!(worker_id, "Worker started");

    loop {
        if state.cancel.is_cancelled() {
            debug!(worker_id, "Worker stopping: cancelled");
            break;
        }
        let Some(entity_id) = state.next_entity() else {
            break;
        };

        let outcome = state.process(entity_id).await;

        if let Err(e) = scrape_attempts::record_outcome(
            state.store.pool(),
            &outcome,
            state.settings.max_lock_wait_ms,
        )
        .await
        {
            error!(worker_id, entity_id, error = %e, "Failed to record scrape attempt");
        }

        let done = state.completed.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome.error_category {
            Some(category) if outcome.status == ScrapeStatus::Failed => warn!(
                worker_id,
                entity_id,
                category = %category,
                "[{}/{}] entity {} failed: {}",
                done,
                state.total,
                entity_id,
                outcome.error_message.as_deref().unwrap_or_default()
            ),
            _ => info!(
                worker_id,
                entity_id,
                rows = outcome.rows_merged,
                "[{}/{}] entity {} {}",
                done,
                state.total,
                entity_id,
                outcome.status
            ),
        }
    }

    debug!(worker_id, "Worker finished");
}

/// Worker pool bound to one store, source and rate gate
pub struct WorkerPool {
    store: MergeStore,
    source: Arc<dyn SourceAdapter>,
    gate: Arc<RateGate>,
}

impl WorkerPool {
    pub fn new(store: MergeStore, source: Arc<dyn SourceAdapter>, gate: Arc<RateGate>) -> Self {
        Self {
            store,
            source,
            gate,
        }
    }

    /// Drain `entity_ids` with `settings.workers` concurrent workers
    ///
    /// The attempt rows must already be enqueued for `job_id`.
    pub async fn run_pass(
        &self,
        job_id: Uuid,
        entity_ids: Vec<i64>,
        settings: PoolSettings,
        cancel: &CancellationToken,
    ) -> PassReport {
        let total = entity_ids.len();
        let workers = settings.workers.clamp(1, total.max(1));

        let state = Arc::new(PassState {
            job_id,
            store: self.store.clone(),
            source: Arc::clone(&self.source),
            gate: Arc::clone(&self.gate),
            settings,
            queue: Mutex::new(entity_ids.into()),
            total,
            completed: AtomicUsize::new(0),
            cancel: cancel.clone(),
        });

        info!(%job_id, total, workers, "Starting worker pass");

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| tokio::spawn(run_worker(worker_id, Arc::clone(&state))))
            .collect();

        for result in join_all(handles).await {
            if let Err(join_err) = result {
                error!(%job_id, error = %join_err, "Worker task panicked");
            }
        }

        let report = PassReport {
            processed: state.completed.load(Ordering::SeqCst),
            left_pending: state.remaining(),
        };

        if report.interrupted() {
            warn!(
                %job_id,
                processed = report.processed,
                left_pending = report.left_pending,
                "Pass interrupted"
            );
        }
        report
    }
}
