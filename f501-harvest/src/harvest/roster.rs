//! Roster seeding
//!
//! A league roster is where entities are first sighted: every roster entry
//! creates or refreshes its entity and writes the season row for that league
//! season. Seeding the same roster twice leaves the store unchanged.

use f501_common::models::{JobCounters, JobType};
use tracing::{debug, info, warn};

use super::HarvestReport;
use crate::error::HarvestResult;
use crate::source::{RosterRow, SourceError};
use crate::Harvester;

/// Why one league could not be seeded
#[derive(Debug)]
enum SeedFailure {
    /// Source call failed; the league is counted failed
    Source(SourceError),
    /// Store write failed; the whole job aborts
    Storage(crate::error::HarvestError),
}

fn is_blank_entry(row: &RosterRow) -> bool {
    row.external_id.trim().is_empty()
        || row.display_name.trim().is_empty()
        || row.team.trim().is_empty()
}

impl Harvester {
    /// Fetch and merge one league season; returns the roster counters
    async fn seed_one(&self, league: &str, season: &str) -> Result<JobCounters, SeedFailure> {
        self.gate.acquire().await;

        let roster = tokio::time::timeout(
            self.request_timeout,
            self.source.fetch_league_roster(league, season),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout(self.request_timeout.as_secs())))
        .map_err(SeedFailure::Source)?;

        let mut counters = JobCounters {
            total: roster.len() as u64,
            ..Default::default()
        };

        for row in &roster {
            if is_blank_entry(row) {
                debug!(league, season, external_id = %row.external_id, "Skipping blank roster entry");
                counters.skipped += 1;
                continue;
            }
            self.store
                .merge_roster_row(league, season, row)
                .await
                .map_err(|e| SeedFailure::Storage(e.into()))?;
            counters.succeeded += 1;
            counters.rows_written += 1;
        }

        info!(
            league,
            season,
            entries = counters.total,
            merged = counters.succeeded,
            skipped = counters.skipped,
            "Roster seeded"
        );
        Ok(counters)
    }

    /// Seed entities and season rows from one league season roster
    ///
    /// A source failure closes the job `failed` and is returned in the report.
    pub async fn seed_league_roster(&self, league: &str, season: &str) -> HarvestResult<HarvestReport> {
        let mut job = self
            .ledger
            .open(JobType::RosterSeed, format!("{} {}", league, season))
            .await?;
        let _alive = self.ledger.keep_alive(&job);

        match self.seed_one(league, season).await {
            Ok(counters) => self.ledger.complete(&mut job, counters, false).await?,
            Err(SeedFailure::Source(e)) => {
                warn!(league, season, error = %e, "Roster fetch failed");
                self.ledger.abort(&mut job, e.to_string()).await?;
            }
            Err(SeedFailure::Storage(e)) => {
                self.ledger.abort(&mut job, e.to_string()).await?;
                return Err(e);
            }
        }

        Ok(HarvestReport { job, rounds: 1 })
    }

    /// Re-seed every configured league for the configured current season
    ///
    /// One failing league makes the job `partial`; all leagues failing makes
    /// it `failed`.
    pub async fn harvest_current_season(&self) -> HarvestResult<HarvestReport> {
        let season = self.season.current_season.clone();
        let leagues = self.season.leagues.clone();
        let mut job = self
            .ledger
            .open(
                JobType::SeasonUpdate,
                format!("{} ({} leagues)", season, leagues.len()),
            )
            .await?;
        let _alive = self.ledger.keep_alive(&job);

        // Items of a season update are leagues; rows_written counts roster rows
        let mut counters = JobCounters {
            total: leagues.len() as u64,
            ..Default::default()
        };
        let mut failed_leagues = Vec::new();

        for league in &leagues {
            match self.seed_one(league, &season).await {
                Ok(seeded) => {
                    counters.succeeded += 1;
                    counters.rows_written += seeded.rows_written;
                }
                Err(SeedFailure::Source(e)) => {
                    warn!(league = %league, season = %season, error = %e, "League update failed");
                    counters.failed += 1;
                    failed_leagues.push(format!("{}: {}", league, e));
                }
                Err(SeedFailure::Storage(e)) => {
                    self.ledger.abort(&mut job, e.to_string()).await?;
                    return Err(e);
                }
            }
        }

        if !leagues.is_empty() && failed_leagues.len() == leagues.len() {
            job.counters = counters;
            self.ledger
                .abort(&mut job, format!("All leagues failed: {}", failed_leagues.join("; ")))
                .await?;
        } else {
            if !failed_leagues.is_empty() {
                job.error_message = Some(failed_leagues.join("; "));
            }
            self.ledger.complete(&mut job, counters, false).await?;
        }

        Ok(HarvestReport { job, rounds: 1 })
    }
}
