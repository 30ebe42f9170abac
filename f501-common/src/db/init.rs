//! Database initialization
//!
//! One canonical schema, created idempotently on every start. There is no
//! migration chain: `schema_version` records the layout the file was created
//! with so an incompatible file is refused instead of silently reused.

use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Layout version written into `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// SQLite busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u64 = 250;

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    check_schema_version(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_entities_table(pool).await?;
    create_season_records_table(pool).await?;
    create_questions_table(pool).await?;
    create_answers_table(pool).await?;
    create_jobs_table(pool).await?;
    create_scrape_attempts_table(pool).await?;
    debug!("Schema ensured");
    Ok(())
}

async fn check_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    let newest: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    if newest > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "Database schema version {} is newer than supported version {}",
            newest, SCHEMA_VERSION
        )));
    }
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the entities table
///
/// `id` is the local surrogate key; its order is entity creation order.
pub async fn create_entities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            nationality TEXT,
            last_harvested_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entities_normalized_name ON entities(normalized_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the season_records table
///
/// Keyed by (entity, season, team key, competition key); the keys are
/// normalized names so cosmetic renames at the source merge into one row.
pub async fn create_season_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS season_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            season TEXT NOT NULL,
            team TEXT NOT NULL,
            team_key TEXT NOT NULL,
            competition TEXT NOT NULL,
            competition_key TEXT NOT NULL,
            country TEXT,
            appearances INTEGER NOT NULL DEFAULT 0 CHECK (appearances >= 0),
            goals INTEGER NOT NULL DEFAULT 0 CHECK (goals >= 0),
            assists INTEGER NOT NULL DEFAULT 0 CHECK (assists >= 0),
            clean_sheets INTEGER NOT NULL DEFAULT 0 CHECK (clean_sheets >= 0),
            minutes INTEGER NOT NULL DEFAULT 0 CHECK (minutes >= 0),
            updated_at TEXT NOT NULL,
            UNIQUE (entity_id, season, team_key, competition_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_season_records_team ON season_records(team_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_season_records_competition ON season_records(competition_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_questions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id TEXT PRIMARY KEY,
            question_text TEXT NOT NULL,
            metric_key TEXT NOT NULL,
            team_filter TEXT,
            competition_filter TEXT,
            season_filter TEXT,
            nationality_filter TEXT,
            aggregation TEXT NOT NULL DEFAULT 'sum_all_seasons',
            min_score INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the answers table
///
/// One answer per (question, normalized name).
pub async fn create_answers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answers (
            question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            display_name TEXT NOT NULL,
            answer_key TEXT NOT NULL,
            score INTEGER NOT NULL,
            is_valid INTEGER NOT NULL,
            is_bust INTEGER NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (question_id, answer_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            scope TEXT NOT NULL,
            status TEXT NOT NULL,
            items_total INTEGER NOT NULL DEFAULT 0,
            items_succeeded INTEGER NOT NULL DEFAULT 0,
            items_failed INTEGER NOT NULL DEFAULT 0,
            items_skipped INTEGER NOT NULL DEFAULT 0,
            rows_written INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            heartbeat_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    // At most one running harvest-kind job across every process on the file
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_running_harvest
        ON jobs(status)
        WHERE status = 'running' AND job_type != 'aggregation'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scrape_attempts table
///
/// One row per (job, entity). Rows are inserted when a run enqueues the
/// entity, so the highest rowid of an entity is its current scrape status.
pub async fn create_scrape_attempts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrape_attempts (
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            entity_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            error_category TEXT,
            error_message TEXT,
            rows_merged INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (job_id, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scrape_attempts_entity ON scrape_attempts(entity_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
