//! f501-harvest library interface
//!
//! The [`Harvester`] wires the rate gate, source adapter, merge store and job
//! ledger over one SQLite pool and exposes the harvesting, aggregation and
//! reporting operations. The `f501-harvest` binary is a thin CLI over it.

pub mod aggregation;
pub mod db;
pub mod error;
pub mod harvest;
pub mod ledger;
pub mod merge_store;
pub mod question_import;
pub mod rate_gate;
pub mod source;
pub mod utils;

pub use crate::error::{HarvestError, HarvestResult};
pub use crate::harvest::{HarvestOptions, HarvestReport};

use f501_common::config::{HarvestConfig, SeasonConfig, TomlConfig};
use f501_common::models::{Entity, ScrapeAttempt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::aggregation::{AggregationReport, AnswerSetSummary};
use crate::ledger::{FailedEntity, JobLedger, StatusSummary};
use crate::merge_store::MergeStore;
use crate::rate_gate::RateGate;
use crate::source::SourceAdapter;

/// Harvesting pipeline over one database
///
/// One instance owns one rate gate: every fetch it makes, from any worker,
/// is paced by the same minimum interval.
pub struct Harvester {
    pub(crate) pool: SqlitePool,
    pub(crate) harvest: HarvestConfig,
    pub(crate) season: SeasonConfig,
    pub(crate) request_timeout: Duration,
    pub(crate) gate: Arc<RateGate>,
    pub(crate) source: Arc<dyn SourceAdapter>,
    pub(crate) store: MergeStore,
    pub(crate) ledger: JobLedger,
}

impl Harvester {
    /// Build a pipeline; fails on invalid harvest settings
    pub fn new(
        pool: SqlitePool,
        config: &TomlConfig,
        source: Arc<dyn SourceAdapter>,
    ) -> HarvestResult<Self> {
        config
            .harvest
            .validate()
            .map_err(|e| HarvestError::Configuration(e.to_string()))?;

        let wait = config.harvest.max_lock_wait_ms;
        Ok(Self {
            gate: RateGate::shared(config.harvest.min_interval()),
            store: MergeStore::new(pool.clone(), wait),
            ledger: JobLedger::new(pool.clone(), wait),
            harvest: config.harvest.clone(),
            season: config.season.clone(),
            request_timeout: config.source.request_timeout(),
            source,
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Recompute one question's answer set under its own aggregation job
    pub async fn compute_answers(&self, question_id: Uuid) -> HarvestResult<AnswerSetSummary> {
        aggregation::compute_answers(
            &self.pool,
            &self.ledger,
            question_id,
            self.harvest.max_lock_wait_ms,
        )
        .await
    }

    /// Recompute every active question under one aggregation job
    pub async fn compute_all_active_answers(&self) -> HarvestResult<AggregationReport> {
        aggregation::compute_all_active_answers(
            &self.pool,
            &self.ledger,
            self.harvest.max_lock_wait_ms,
        )
        .await
    }

    pub async fn status_summary(&self) -> HarvestResult<StatusSummary> {
        ledger::status_summary(&self.pool).await
    }

    pub async fn failed_entities(&self) -> HarvestResult<Vec<FailedEntity>> {
        ledger::failed_entities(&self.pool).await
    }

    pub async fn pending_entities(&self) -> HarvestResult<Vec<ScrapeAttempt>> {
        ledger::pending_entities(&self.pool).await
    }

    /// Entity with all its season records
    pub async fn get_entity(&self, entity_id: i64) -> HarvestResult<Entity> {
        self.store
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("entity {}", entity_id)))
    }

    /// Close jobs left running by a process that died
    pub async fn cleanup_stale(&self) -> HarvestResult<usize> {
        self.ledger.cleanup_stale().await
    }
}
