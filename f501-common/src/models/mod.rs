//! Domain models shared by the harvester and the answer engine

pub mod entity;
pub mod job;
pub mod question;
pub mod season;

pub use entity::{Counter, Counters, Entity, SeasonKey, SeasonRecord};
pub use job::{ErrorCategory, Job, JobCounters, JobStatus, JobType, ScrapeAttempt, ScrapeStatus};
pub use question::{AggregationStrategy, Answer, Metric, Question, QuestionFilter};
pub use season::{compare_seasons, same_season, SeasonOrder};
