//! Error types for f501-harvest

use thiserror::Error;

/// Error returned by the public harvest and aggregation operations
///
/// Per-entity source failures never surface here: they are recorded on the
/// scrape log and counted on the job.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Operation cannot run with the given configuration or input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another harvest-type job is still running
    #[error("Harvest job {0} is already running")]
    RunInProgress(uuid::Uuid),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage or configuration error from f501-common
    #[error(transparent)]
    Common(#[from] f501_common::Error),
}

impl From<sqlx::Error> for HarvestError {
    fn from(err: sqlx::Error) -> Self {
        HarvestError::Common(f501_common::Error::Database(err))
    }
}

/// Convenience type for harvest results
pub type HarvestResult<T> = Result<T, HarvestError>;
