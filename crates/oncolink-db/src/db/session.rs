use async_trait::async_trait;
use oncolink_core::models::Session;
use oncolink_core::AppError;
use sqlx::PgPool;

use crate::traits::SessionRepository;

/// Repository for anonymous upload sessions
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, token_hash, expires_at, used, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.used)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::data_access("inserting session", e))?;

        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, token_hash, expires_at, used, created_at
            FROM sessions
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::data_access("looking up session", e))?;

        Ok(session)
    }

    async fn mark_used_if_unused(&self, token_hash: &str) -> Result<bool, AppError> {
        // Compare-and-set in a single statement; concurrent callers serialize on the row lock.
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET used = TRUE
            WHERE token_hash = $1 AND used = FALSE
            "#,
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::data_access("invalidating session", e))?;

        Ok(result.rows_affected() == 1)
    }
}
