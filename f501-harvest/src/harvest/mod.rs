//! Harvest runs
//!
//! A run opens a job, records every input entity as pending, drains the
//! queue through the worker pool and closes the job from the scrape log.

pub mod retry;
pub mod roster;
pub mod worker_pool;

use f501_common::models::{Job, JobType};
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::scrape_attempts;
use crate::error::HarvestResult;
use crate::Harvester;

pub use worker_pool::{PassReport, PoolSettings, WorkerPool};

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Ignore the freshness window
    pub force: bool,
    /// Stops dequeuing when cancelled; in-flight entities finish
    pub cancel: CancellationToken,
}

/// Closed job of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub job: Job,
    /// Worker passes made; always 1 for a plain harvest
    pub rounds: u32,
}

/// Drop repeated ids, keeping first-seen order
pub(crate) fn dedup_ids(entity_ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(entity_ids.len());
    entity_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

impl Harvester {
    pub(crate) fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.store.clone(),
            std::sync::Arc::clone(&self.source),
            std::sync::Arc::clone(&self.gate),
        )
    }

    pub(crate) fn pool_settings(&self, force: bool) -> PoolSettings {
        PoolSettings {
            workers: self.harvest.workers,
            request_timeout: self.request_timeout,
            freshness_window: self.harvest.freshness_window(),
            force,
            max_lock_wait_ms: self.harvest.max_lock_wait_ms,
        }
    }

    /// Harvest the given local entity ids
    ///
    /// Refuses to start while another harvest job is running. The job ends
    /// `success` if nothing failed, `partial` if anything failed or the run
    /// was cancelled.
    pub async fn harvest_entities(
        &self,
        entity_ids: &[i64],
        options: &HarvestOptions,
    ) -> HarvestResult<HarvestReport> {
        let ids = dedup_ids(entity_ids);
        let mut job = self
            .ledger
            .open(JobType::Harvest, format!("{} entities", ids.len()))
            .await?;
        let _alive = self.ledger.keep_alive(&job);

        match self.run_harvest(&mut job, ids, options).await {
            Ok(()) => Ok(HarvestReport { job, rounds: 1 }),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Harvest aborted");
                if let Err(close_err) = self.ledger.abort(&mut job, e.to_string()).await {
                    error!(job_id = %job.id, error = %close_err, "Failed to close aborted job");
                }
                Err(e)
            }
        }
    }

    async fn run_harvest(
        &self,
        job: &mut Job,
        ids: Vec<i64>,
        options: &HarvestOptions,
    ) -> HarvestResult<()> {
        let wait = self.harvest.max_lock_wait_ms;
        let queued: Vec<(i64, u32)> = ids.iter().map(|id| (*id, 0)).collect();
        scrape_attempts::enqueue(&self.pool, job.id, &queued, wait).await?;

        let pass = self
            .worker_pool()
            .run_pass(job.id, ids, self.pool_settings(options.force), &options.cancel)
            .await;

        let counters = scrape_attempts::job_tally(&self.pool, job.id).await?;
        self.ledger.complete(job, counters, pass.interrupted()).await?;

        info!(
            job_id = %job.id,
            status = %job.status,
            processed = pass.processed,
            "Harvest finished"
        );
        Ok(())
    }

    /// Harvest every known entity
    pub async fn harvest_all(&self, options: &HarvestOptions) -> HarvestResult<HarvestReport> {
        let ids = crate::db::entities::list_entity_ids(&self.pool).await?;
        self.harvest_entities(&ids, options).await
    }
}
