//! Retry driver
//!
//! Re-harvests entities whose latest attempt failed, round after round, until
//! no failed entity has attempts left or a round makes no candidates. Attempt
//! counts carry over from earlier runs, so an entity is fetched at most
//! `max_attempts` times over its whole history of failures.

use f501_common::models::JobType;
use std::time::Duration;
use tracing::{info, warn};

use super::{HarvestOptions, HarvestReport};
use crate::db::scrape_attempts;
use crate::error::HarvestResult;
use crate::Harvester;

/// Delay before retry round `round` (1-based); doubles each round
pub fn backoff_for_round(base_ms: u64, round: u32) -> Duration {
    let exponent = round.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

impl Harvester {
    /// Retry every failed entity that still has attempts left
    ///
    /// Retries always fetch, regardless of freshness. All rounds run under a
    /// single `retry` job.
    pub async fn retry_failed(&self, options: &HarvestOptions) -> HarvestResult<HarvestReport> {
        let max_attempts = self.harvest.max_attempts;
        let initial = scrape_attempts::retry_candidates(&self.pool, max_attempts).await?;
        let mut job = self
            .ledger
            .open(
                JobType::Retry,
                format!("{} failed entities, max {} attempts", initial.len(), max_attempts),
            )
            .await?;
        let _alive = self.ledger.keep_alive(&job);

        let wait = self.harvest.max_lock_wait_ms;
        let pool = self.worker_pool();
        let mut candidates = initial;
        let mut rounds = 0u32;
        let mut interrupted = false;

        let result: HarvestResult<()> = async {
            // Rounds are capped too: a failure before the fetch does not consume an attempt
            while !candidates.is_empty() && rounds < max_attempts {
                if rounds > 0 {
                    let delay = backoff_for_round(self.harvest.retry_backoff_ms, rounds);
                    info!(
                        job_id = %job.id,
                        round = rounds + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before next retry round"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = options.cancel.cancelled() => {
                            interrupted = true;
                            break;
                        }
                    }
                }
                rounds += 1;

                info!(job_id = %job.id, round = rounds, entities = candidates.len(), "Retry round");
                scrape_attempts::enqueue(&self.pool, job.id, &candidates, wait).await?;

                let ids = candidates.iter().map(|(id, _)| *id).collect();
                let pass = pool
                    .run_pass(job.id, ids, self.pool_settings(true), &options.cancel)
                    .await;
                if pass.interrupted() {
                    interrupted = true;
                    break;
                }

                candidates = scrape_attempts::retry_candidates(&self.pool, max_attempts).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(job_id = %job.id, error = %e, "Retry aborted");
            self.ledger.abort(&mut job, e.to_string()).await?;
            return Err(e);
        }

        let counters = scrape_attempts::job_tally(&self.pool, job.id).await?;
        self.ledger.complete(&mut job, counters, interrupted).await?;

        let still_failed = scrape_attempts::latest_with_status(
            &self.pool,
            f501_common::models::ScrapeStatus::Failed,
        )
        .await?
        .len();
        info!(job_id = %job.id, rounds, still_failed, "Retry finished");

        Ok(HarvestReport { job, rounds })
    }
}
