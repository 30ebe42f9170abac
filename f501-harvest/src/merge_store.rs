//! Canonical per-entity statistics store
//!
//! Season records are keyed by (entity, season, team, competition). A later
//! harvest of the same key replaces the counters in place, so merging the
//! same rows twice leaves the store unchanged.

use chrono::Utc;
use f501_common::models::{Counters, Entity, SeasonKey};
use f501_common::Result;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::{entities, seasons};
use crate::source::{RosterRow, SeasonRow};
use crate::utils::retry_on_lock;

/// Season labels that mark summary rows rather than real seasons
const SUMMARY_LABELS: [&str; 4] = ["total", "totals", "season", "career"];

/// Why a fetched row set could not be merged
#[derive(Debug, Error)]
pub enum MergeError {
    /// The source returned rows, but none of them was usable
    #[error("No usable season rows ({dropped} dropped)")]
    NoUsableRows { dropped: usize },

    #[error(transparent)]
    Storage(#[from] f501_common::Error),
}

/// Season row after validation, ready to upsert
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub key: SeasonKey,
    pub country: Option<String>,
    pub counters: Counters,
}

/// Validate raw rows, dropping blanks and summary lines
///
/// Returns the usable rows and the number dropped. Unknown metric names are
/// ignored.
pub fn clean_rows(rows: &[SeasonRow]) -> (Vec<CleanRow>, usize) {
    let mut clean = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let season = row.season.trim();
        let team = row.team.trim();
        let competition = row.competition.trim();

        if season.is_empty() || team.is_empty() || competition.is_empty() || is_summary(season) {
            dropped += 1;
            continue;
        }

        let (counters, unknown) = Counters::from_metric_map(&row.metrics);
        if !unknown.is_empty() {
            tracing::trace!(season, team, ?unknown, "Ignoring unknown metrics");
        }

        clean.push(CleanRow {
            key: SeasonKey {
                season: season.to_string(),
                team: team.to_string(),
                competition: competition.to_string(),
            },
            country: row.country.clone(),
            counters,
        });
    }

    (clean, dropped)
}

fn is_summary(season: &str) -> bool {
    let lowered = season.to_ascii_lowercase();
    SUMMARY_LABELS.contains(&lowered.as_str()) || lowered.ends_with(" seasons")
}

/// Merge store over the shared SQLite pool
#[derive(Clone)]
pub struct MergeStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl MergeStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create an entity on first sighting or refresh its name and nationality
    pub async fn upsert_entity(
        &self,
        external_id: &str,
        display_name: &str,
        nationality: Option<&str>,
    ) -> Result<i64> {
        retry_on_lock("upsert_entity", self.max_lock_wait_ms, || async {
            let mut conn = self.pool.acquire().await?;
            entities::upsert_entity(&mut conn, external_id, display_name, nationality, Utc::now())
                .await
        })
        .await
    }

    /// Insert or replace one season record
    pub async fn upsert_season(
        &self,
        entity_id: i64,
        key: &SeasonKey,
        country: Option<&str>,
        counters: &Counters,
    ) -> Result<()> {
        retry_on_lock("upsert_season", self.max_lock_wait_ms, || async {
            let mut conn = self.pool.acquire().await?;
            seasons::upsert_season(&mut conn, entity_id, key, country, counters, Utc::now()).await
        })
        .await
    }

    /// Apply one fetch result: every usable row plus the harvest stamp, atomically
    ///
    /// An empty fetch is a successful harvest with nothing to merge. A
    /// non-empty fetch without a single usable row is a parse mismatch.
    /// Returns the number of rows merged.
    pub async fn merge_rows(
        &self,
        entity_id: i64,
        rows: &[SeasonRow],
    ) -> std::result::Result<usize, MergeError> {
        let (clean, dropped) = clean_rows(rows);
        if clean.is_empty() && dropped > 0 {
            return Err(MergeError::NoUsableRows { dropped });
        }

        let merged = retry_on_lock("merge_rows", self.max_lock_wait_ms, || async {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            for row in &clean {
                seasons::upsert_season(
                    &mut tx,
                    entity_id,
                    &row.key,
                    row.country.as_deref(),
                    &row.counters,
                    now,
                )
                .await?;
            }
            entities::mark_harvested(&mut tx, entity_id, now).await?;

            tx.commit().await?;
            Ok(clean.len())
        })
        .await?;

        if dropped > 0 {
            tracing::debug!(entity_id, merged, dropped, "Dropped unusable season rows");
        }
        Ok(merged)
    }

    /// Upsert a roster entry and its season row for one league season
    ///
    /// Returns the entity's local id.
    pub async fn merge_roster_row(&self, league: &str, season: &str, row: &RosterRow) -> Result<i64> {
        let (counters, _) = Counters::from_metric_map(&row.metrics);
        let key = SeasonKey {
            season: season.trim().to_string(),
            team: row.team.trim().to_string(),
            competition: league.trim().to_string(),
        };

        retry_on_lock("merge_roster_row", self.max_lock_wait_ms, || async {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            let entity_id = entities::upsert_entity(
                &mut tx,
                &row.external_id,
                &row.display_name,
                row.nationality.as_deref(),
                now,
            )
            .await?;
            seasons::upsert_season(&mut tx, entity_id, &key, row.country.as_deref(), &counters, now)
                .await?;

            tx.commit().await?;
            Ok(entity_id)
        })
        .await
    }

    /// Entity with its full season record collection
    pub async fn get_entity(&self, entity_id: i64) -> Result<Option<Entity>> {
        let Some(mut entity) = entities::load_entity(&self.pool, entity_id).await? else {
            return Ok(None);
        };
        entity.seasons = seasons::load_seasons(&self.pool, entity_id).await?;
        Ok(Some(entity))
    }

    pub async fn find_entity(&self, external_id: &str) -> Result<Option<Entity>> {
        let Some(mut entity) = entities::find_by_external_id(&self.pool, external_id).await? else {
            return Ok(None);
        };
        entity.seasons = seasons::load_seasons(&self.pool, entity.id).await?;
        Ok(Some(entity))
    }
}
