//! Entity database operations

use chrono::{DateTime, Utc};
use f501_common::models::Entity;
use f501_common::{normalize_name, time, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

const ENTITY_COLUMNS: &str = "id, external_id, display_name, normalized_name, nationality, \
     last_harvested_at, created_at, updated_at";

/// Create an entity on first sighting, or refresh its name and nationality
///
/// A missing nationality never erases a known one. Returns the local id.
pub async fn upsert_entity(
    conn: &mut SqliteConnection,
    external_id: &str,
    display_name: &str,
    nationality: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let now = time::to_db(&now);
    let nationality = nationality.map(str::trim).filter(|n| !n.is_empty());

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO entities (
            external_id, display_name, normalized_name, nationality, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            display_name = excluded.display_name,
            normalized_name = excluded.normalized_name,
            nationality = COALESCE(excluded.nationality, entities.nationality),
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(external_id.trim())
    .bind(display_name.trim())
    .bind(normalize_name(display_name))
    .bind(nationality)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Stamp a successful detail harvest
pub async fn mark_harvested(
    conn: &mut SqliteConnection,
    entity_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    let at = time::to_db(&at);
    sqlx::query("UPDATE entities SET last_harvested_at = ?, updated_at = ? WHERE id = ?")
        .bind(&at)
        .bind(&at)
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Load an entity without its season records
pub async fn load_entity(pool: &SqlitePool, entity_id: i64) -> Result<Option<Entity>> {
    let row = sqlx::query(&format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS))
        .bind(entity_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(entity_from_row).transpose()
}

pub async fn find_by_external_id(pool: &SqlitePool, external_id: &str) -> Result<Option<Entity>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM entities WHERE external_id = ?",
        ENTITY_COLUMNS
    ))
    .bind(external_id.trim())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(entity_from_row).transpose()
}

/// All entity ids in creation order
pub async fn list_entity_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM entities ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn count_entities(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let last_harvested_at: Option<String> = row.get("last_harvested_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Entity {
        id: row.get("id"),
        external_id: row.get("external_id"),
        display_name: row.get("display_name"),
        normalized_name: row.get("normalized_name"),
        nationality: row.get("nationality"),
        last_harvested_at: time::from_db_opt(last_harvested_at.as_deref())?,
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
        seasons: Vec::new(),
    })
}
