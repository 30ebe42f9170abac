//! Answer set database operations

use f501_common::models::Answer;
use f501_common::{time, Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::utils::retry_on_lock;

/// Replace the whole answer set of a question in one transaction
///
/// Readers see either the previous set or the new one, never a mix.
pub async fn replace_answers(
    pool: &SqlitePool,
    question_id: Uuid,
    answers: &[Answer],
    max_lock_wait_ms: u64,
) -> Result<usize> {
    let question_id = question_id.to_string();

    retry_on_lock("replace_answers", max_lock_wait_ms, || async {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM answers WHERE question_id = ?")
            .bind(&question_id)
            .execute(&mut *tx)
            .await?;

        for answer in answers {
            sqlx::query(
                r#"
                INSERT INTO answers (
                    question_id, entity_id, display_name, answer_key,
                    score, is_valid, is_bust, computed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&question_id)
            .bind(answer.entity_id)
            .bind(&answer.display_name)
            .bind(&answer.answer_key)
            .bind(answer.score)
            .bind(answer.is_valid)
            .bind(answer.is_bust)
            .bind(time::to_db(&answer.computed_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(answers.len())
    })
    .await
}

/// Answer set of a question, highest score first
pub async fn list_answers(pool: &SqlitePool, question_id: Uuid) -> Result<Vec<Answer>> {
    let rows = sqlx::query(
        r#"
        SELECT question_id, entity_id, display_name, answer_key,
               score, is_valid, is_bust, computed_at
        FROM answers
        WHERE question_id = ?
        ORDER BY score DESC, answer_key
        "#,
    )
    .bind(question_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let computed_at: String = row.get("computed_at");
            Ok(Answer {
                question_id,
                entity_id: row.get("entity_id"),
                display_name: row.get("display_name"),
                answer_key: row.get("answer_key"),
                score: row.get("score"),
                is_valid: row.get("is_valid"),
                is_bust: row.get("is_bust"),
                computed_at: time::from_db(&computed_at)?,
            })
        })
        .collect::<std::result::Result<Vec<_>, Error>>()
}

pub async fn count_answers(pool: &SqlitePool, question_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE question_id = ?")
        .bind(question_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
