//! Season record database operations

use chrono::{DateTime, Utc};
use f501_common::models::{Counters, SeasonKey, SeasonRecord};
use f501_common::{normalize_name, time, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

const SEASON_COLUMNS: &str = "sr.id, sr.entity_id, sr.season, sr.team, sr.competition, sr.country, \
     sr.appearances, sr.goals, sr.assists, sr.clean_sheets, sr.minutes, sr.updated_at";

/// Insert a season record, or replace the counters of the existing one
///
/// The record key is (entity, season, normalized team, normalized
/// competition); display names follow the latest harvest. Writing the
/// values already stored leaves the row untouched, `updated_at` included.
pub async fn upsert_season(
    conn: &mut SqliteConnection,
    entity_id: i64,
    key: &SeasonKey,
    country: Option<&str>,
    counters: &Counters,
    now: DateTime<Utc>,
) -> Result<()> {
    let country = country.map(str::trim).filter(|c| !c.is_empty());

    sqlx::query(
        r#"
        INSERT INTO season_records (
            entity_id, season, team, team_key, competition, competition_key, country,
            appearances, goals, assists, clean_sheets, minutes, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity_id, season, team_key, competition_key) DO UPDATE SET
            team = excluded.team,
            competition = excluded.competition,
            country = COALESCE(excluded.country, season_records.country),
            appearances = excluded.appearances,
            goals = excluded.goals,
            assists = excluded.assists,
            clean_sheets = excluded.clean_sheets,
            minutes = excluded.minutes,
            updated_at = excluded.updated_at
        WHERE season_records.team IS NOT excluded.team
           OR season_records.competition IS NOT excluded.competition
           OR (excluded.country IS NOT NULL
               AND season_records.country IS NOT excluded.country)
           OR season_records.appearances IS NOT excluded.appearances
           OR season_records.goals IS NOT excluded.goals
           OR season_records.assists IS NOT excluded.assists
           OR season_records.clean_sheets IS NOT excluded.clean_sheets
           OR season_records.minutes IS NOT excluded.minutes
        "#,
    )
    .bind(entity_id)
    .bind(key.season.trim())
    .bind(key.team.trim())
    .bind(normalize_name(&key.team))
    .bind(key.competition.trim())
    .bind(normalize_name(&key.competition))
    .bind(country)
    .bind(counters.appearances)
    .bind(counters.goals)
    .bind(counters.assists)
    .bind(counters.clean_sheets)
    .bind(counters.minutes)
    .bind(time::to_db(&now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// All season records of one entity, in insertion order
pub async fn load_seasons(pool: &SqlitePool, entity_id: i64) -> Result<Vec<SeasonRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM season_records sr WHERE sr.entity_id = ? ORDER BY sr.id",
        SEASON_COLUMNS
    ))
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(season_from_row).collect()
}

/// Season record joined with the owning entity's identity
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub record: SeasonRecord,
    pub display_name: String,
    pub normalized_name: String,
    pub nationality: Option<String>,
}

/// Season records for aggregation, in entity creation order then record order
///
/// `team_key` / `competition_key` are normalized names; `None` matches all.
pub async fn load_candidates(
    pool: &SqlitePool,
    team_key: Option<&str>,
    competition_key: Option<&str>,
) -> Result<Vec<CandidateRecord>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}, e.display_name, e.normalized_name, e.nationality
        FROM season_records sr
        JOIN entities e ON e.id = sr.entity_id
        WHERE (? IS NULL OR sr.team_key = ?)
          AND (? IS NULL OR sr.competition_key = ?)
        ORDER BY sr.entity_id, sr.id
        "#,
        SEASON_COLUMNS
    ))
    .bind(team_key)
    .bind(team_key)
    .bind(competition_key)
    .bind(competition_key)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CandidateRecord {
                record: season_from_row(row)?,
                display_name: row.get("display_name"),
                normalized_name: row.get("normalized_name"),
                nationality: row.get("nationality"),
            })
        })
        .collect()
}

pub async fn count_season_records(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM season_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn season_from_row(row: &SqliteRow) -> Result<SeasonRecord> {
    let updated_at: String = row.get("updated_at");

    Ok(SeasonRecord {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        season: row.get("season"),
        team: row.get("team"),
        competition: row.get("competition"),
        country: row.get("country"),
        counters: Counters {
            appearances: row.get("appearances"),
            goals: row.get("goals"),
            assists: row.get("assists"),
            clean_sheets: row.get("clean_sheets"),
            minutes: row.get("minutes"),
        },
        updated_at: time::from_db(&updated_at)?,
    })
}
