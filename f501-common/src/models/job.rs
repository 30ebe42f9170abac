//! Job ledger and per-entity scrape attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Kind of run recorded in the job ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Detail harvest of an explicit entity list
    Harvest,
    /// Resubmission of failed entities
    Retry,
    /// Bulk seeding from one league roster
    RosterSeed,
    /// Scheduled re-seed of the configured current season
    SeasonUpdate,
    /// Answer set recomputation
    Aggregation,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Harvest => "harvest",
            JobType::Retry => "retry",
            JobType::RosterSeed => "roster_seed",
            JobType::SeasonUpdate => "season_update",
            JobType::Aggregation => "aggregation",
        }
    }

    /// Job types that write to the merge store through the source adapter
    pub fn is_harvest_kind(&self) -> bool {
        !matches!(self, JobType::Aggregation)
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    /// Finished with no failures
    Success,
    /// Finished, but some items failed or the run was interrupted
    Partial,
    /// Aborted before completion
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

/// Per-job counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Items (entities, leagues or questions) in scope
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Season records merged or answers written
    pub rows_written: u64,
}

impl JobCounters {
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    /// Items in scope without a terminal outcome
    pub fn unaccounted(&self) -> u64 {
        self.total.saturating_sub(self.processed())
    }
}

/// One harvesting or aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    /// Human-readable scope, e.g. "3 entities" or "Premier League 2024-2025"
    pub scope: String,
    pub status: JobStatus,
    pub counters: JobCounters,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, scope: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            scope: scope.into(),
            status: JobStatus::Running,
            counters: JobCounters::default(),
            error_message: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Close a run that reached the end of its work list
    ///
    /// `interrupted` marks runs stopped by the operator: whatever finished is
    /// kept and the job is reported `partial`. Items in scope that never got
    /// a terminal outcome also make the job `partial`.
    pub fn complete(&mut self, counters: JobCounters, interrupted: bool) {
        self.counters = counters;
        let unaccounted = counters.unaccounted();
        self.status = if counters.failed > 0 || interrupted || unaccounted > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Success
        };
        if self.error_message.is_none() {
            if interrupted {
                self.error_message = Some("Interrupted by operator".to_string());
            } else if unaccounted > 0 {
                self.error_message = Some(format!(
                    "{} of {} items left without an outcome",
                    unaccounted, counters.total
                ));
            }
        }
        self.ended_at = Some(Utc::now());
    }

    /// Close a run that could not start or was aborted
    pub fn abort(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, JobStatus::Running)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Status of one entity within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::Success => "success",
            ScrapeStatus::Failed => "failed",
            ScrapeStatus::Skipped => "skipped",
        }
    }
}

/// Failure or skip classification recorded on an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    ParseMismatch,
    Rejected,
    NotFound,
    /// Entity id never seen in the merge store
    UnknownEntity,
    /// Harvested recently, not forced
    Fresh,
    /// Fetch succeeded but the merge could not be written
    Storage,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ParseMismatch => "parse_mismatch",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::UnknownEntity => "unknown_entity",
            ErrorCategory::Fresh => "fresh",
            ErrorCategory::Storage => "storage",
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v: &$ty| v.as_str() == s)
                    .ok_or_else(|| {
                        Error::Serialization(format!(
                            "unknown {} value '{}'",
                            stringify!($ty),
                            s
                        ))
                    })
            }
        }
    };
}

impl_str_enum!(
    JobType,
    [
        JobType::Harvest,
        JobType::Retry,
        JobType::RosterSeed,
        JobType::SeasonUpdate,
        JobType::Aggregation,
    ]
);
impl_str_enum!(
    JobStatus,
    [
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Partial,
        JobStatus::Failed,
    ]
);
impl_str_enum!(
    ScrapeStatus,
    [
        ScrapeStatus::Pending,
        ScrapeStatus::Success,
        ScrapeStatus::Failed,
        ScrapeStatus::Skipped,
    ]
);
impl_str_enum!(
    ErrorCategory,
    [
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::ParseMismatch,
        ErrorCategory::Rejected,
        ErrorCategory::NotFound,
        ErrorCategory::UnknownEntity,
        ErrorCategory::Fresh,
        ErrorCategory::Storage,
    ]
);

/// Per-entity, per-run scrape record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeAttempt {
    pub job_id: Uuid,
    pub entity_id: i64,
    pub status: ScrapeStatus,
    /// Fetch attempts consumed so far, carried across retry runs
    pub attempt_count: u32,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub rows_merged: u32,
    pub updated_at: DateTime<Utc>,
}

impl ScrapeAttempt {
    pub fn pending(job_id: Uuid, entity_id: i64, prior_attempts: u32) -> Self {
        Self {
            job_id,
            entity_id,
            status: ScrapeStatus::Pending,
            attempt_count: prior_attempts,
            error_category: None,
            error_message: None,
            rows_merged: 0,
            updated_at: Utc::now(),
        }
    }
}
