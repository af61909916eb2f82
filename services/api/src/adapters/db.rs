//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SombraStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use espelho_core::domain::{Phase, ProgressAdvance, SombraProgress, SombraResponse};
use espelho_core::ports::{PortError, PortResult, SombraStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `SombraStore` port.
#[derive(Clone)]
pub struct PgSombraStore {
    pool: PgPool,
}

impl PgSombraStore {
    /// Creates a new `PgSombraStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> PortError {
    PortError::Store(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProgressRecord {
    user_id: Uuid,
    start_date: DateTime<Utc>,
    last_question_date: Option<DateTime<Utc>>,
    questions_answered_count: i32,
    current_phase: String,
}

impl ProgressRecord {
    fn to_domain(self) -> PortResult<SombraProgress> {
        let current_phase = Phase::parse(&self.current_phase).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Stored phase '{}' for user {} is not a known phase",
                self.current_phase, self.user_id
            ))
        })?;
        Ok(SombraProgress {
            user_id: self.user_id,
            start_date: self.start_date,
            last_question_date: self.last_question_date,
            questions_answered_count: self.questions_answered_count as u32,
            current_phase,
        })
    }
}

#[derive(FromRow)]
struct ResponseRecord {
    id: Uuid,
    user_id: Uuid,
    question_text: String,
    user_answer: String,
    ai_response: String,
    masters_cited: Vec<String>,
    created_at: DateTime<Utc>,
    week_number: i32,
}

impl ResponseRecord {
    fn to_domain(self) -> SombraResponse {
        SombraResponse {
            id: self.id,
            user_id: self.user_id,
            question_text: self.question_text,
            user_answer: self.user_answer,
            ai_response: self.ai_response,
            masters_cited: self.masters_cited,
            created_at: self.created_at,
            week_number: self.week_number as u32,
        }
    }
}

//=========================================================================================
// `SombraStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SombraStore for PgSombraStore {
    async fn initialize_progress(&self, progress: &SombraProgress) -> PortResult<SombraProgress> {
        // Insert-if-absent keeps enrollment idempotent: a second call never
        // touches the existing start_date.
        sqlx::query(
            "INSERT INTO sombra_progress \
             (user_id, start_date, last_question_date, questions_answered_count, current_phase) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(progress.user_id)
        .bind(progress.start_date)
        .bind(progress.last_question_date)
        .bind(progress.questions_answered_count as i32)
        .bind(progress.current_phase.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, start_date, last_question_date, questions_answered_count, current_phase \
             FROM sombra_progress WHERE user_id = $1",
        )
        .bind(progress.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        record.to_domain()
    }

    async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<SombraProgress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, start_date, last_question_date, questions_answered_count, current_phase \
             FROM sombra_progress WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        record.map(ProgressRecord::to_domain).transpose()
    }

    async fn count_responses_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sombra_responses WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(count as u32)
    }

    async fn has_response_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS( \
             SELECT 1 FROM sombra_responses WHERE user_id = $1 AND created_at >= $2)",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(exists)
    }

    async fn answered_question_texts(&self, user_id: Uuid) -> PortResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT question_text FROM sombra_responses WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn recent_responses(&self, user_id: Uuid, limit: u32) -> PortResult<Vec<SombraResponse>> {
        let records = sqlx::query_as::<_, ResponseRecord>(
            "SELECT id, user_id, question_text, user_answer, ai_response, masters_cited, \
             created_at, week_number \
             FROM sombra_responses WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(records.into_iter().map(ResponseRecord::to_domain).collect())
    }

    async fn append_response(
        &self,
        response: &SombraResponse,
        advance: &ProgressAdvance,
        expected_count: u32,
    ) -> PortResult<()> {
        // One transaction for the insert and the progress advance, so a
        // crash can never leave the counter stale relative to the responses
        // table. The count predicate doubles as an optimistic version check
        // against a racing submission from the same user.
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "INSERT INTO sombra_responses \
             (id, user_id, question_text, user_answer, ai_response, masters_cited, \
              created_at, week_number) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(response.id)
        .bind(response.user_id)
        .bind(&response.question_text)
        .bind(&response.user_answer)
        .bind(&response.ai_response)
        .bind(&response.masters_cited)
        .bind(response.created_at)
        .bind(response.week_number as i32)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        let updated = sqlx::query(
            "UPDATE sombra_progress \
             SET last_question_date = $1, questions_answered_count = $2, current_phase = $3 \
             WHERE user_id = $4 AND questions_answered_count = $5",
        )
        .bind(advance.last_question_date)
        .bind(advance.questions_answered_count as i32)
        .bind(advance.current_phase.as_str())
        .bind(response.user_id)
        .bind(expected_count as i32)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(store_err)?;
            return Err(PortError::Conflict(response.user_id));
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }
}
