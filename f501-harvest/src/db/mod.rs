//! Database access for f501-harvest
//!
//! Free functions over a shared `SqlitePool`; the schema itself is owned by
//! `f501_common::db`.

pub mod answers;
pub mod entities;
pub mod jobs;
pub mod questions;
pub mod scrape_attempts;
pub mod seasons;

pub use f501_common::db::init_database;
