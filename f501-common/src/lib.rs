//! # Football 501 Common Library
//!
//! Shared code for the harvester and the answer engine:
//! - Error type
//! - Configuration loading and data folder resolution
//! - Canonical SQLite schema
//! - Domain models (entities, season records, questions, answers, jobs)
//! - Name normalisation

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod time;

pub use error::{Error, Result};
pub use normalize::normalize_name;
