//! Question database operations

use f501_common::models::{Question, QuestionFilter};
use f501_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const QUESTION_COLUMNS: &str = "id, question_text, metric_key, team_filter, competition_filter, \
     season_filter, nationality_filter, aggregation, min_score, is_active, created_at, updated_at";

/// Insert or update a question by id
pub async fn save_question(pool: &SqlitePool, question: &Question) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO questions (
            id, question_text, metric_key, team_filter, competition_filter,
            season_filter, nationality_filter, aggregation, min_score, is_active,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            question_text = excluded.question_text,
            metric_key = excluded.metric_key,
            team_filter = excluded.team_filter,
            competition_filter = excluded.competition_filter,
            season_filter = excluded.season_filter,
            nationality_filter = excluded.nationality_filter,
            aggregation = excluded.aggregation,
            min_score = excluded.min_score,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(question.id.to_string())
    .bind(&question.question_text)
    .bind(&question.metric_key)
    .bind(&question.filter.team)
    .bind(&question.filter.competition)
    .bind(&question.filter.season)
    .bind(&question.filter.nationality)
    .bind(question.aggregation.as_str())
    .bind(question.min_score)
    .bind(question.is_active)
    .bind(time::to_db(&question.created_at))
    .bind(time::to_db(&question.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_question(pool: &SqlitePool, question_id: Uuid) -> Result<Option<Question>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM questions WHERE id = ?",
        QUESTION_COLUMNS
    ))
    .bind(question_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(question_from_row).transpose()
}

/// Look up a question by its exact text
pub async fn find_by_text(pool: &SqlitePool, question_text: &str) -> Result<Option<Question>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM questions WHERE question_text = ? ORDER BY created_at LIMIT 1",
        QUESTION_COLUMNS
    ))
    .bind(question_text)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(question_from_row).transpose()
}

/// Questions in creation order, optionally only the active ones
pub async fn list_questions(pool: &SqlitePool, active_only: bool) -> Result<Vec<Question>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM questions WHERE (? = 0 OR is_active = 1) ORDER BY created_at, id",
        QUESTION_COLUMNS
    ))
    .bind(active_only)
    .fetch_all(pool)
    .await?;

    rows.iter().map(question_from_row).collect()
}

fn question_from_row(row: &SqliteRow) -> Result<Question> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse question id: {}", e)))?;

    let aggregation: String = row.get("aggregation");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Question {
        id,
        question_text: row.get("question_text"),
        metric_key: row.get("metric_key"),
        filter: QuestionFilter {
            team: row.get("team_filter"),
            competition: row.get("competition_filter"),
            season: row.get("season_filter"),
            nationality: row.get("nationality_filter"),
        },
        aggregation: aggregation.parse()?,
        min_score: row.get("min_score"),
        is_active: row.get("is_active"),
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}
