//! Transactional record deletion for session and document erasure.

use async_trait::async_trait;
use oncolink_core::models::ArtifactKind;
use oncolink_core::AppError;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::traits::{ErasureStore, ErasureTransaction};

/// Opens [`PgErasureTransaction`]s on the pool.
#[derive(Clone)]
pub struct PgErasureStore {
    pool: PgPool,
}

impl PgErasureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErasureStore for PgErasureStore {
    async fn begin(&self) -> Result<Box<dyn ErasureTransaction>, AppError> {
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::data_access("beginning erasure transaction", e))?;

        Ok(Box::new(PgErasureTransaction {
            transaction: Some(transaction),
        }))
    }
}

/// A Postgres transaction that is rolled back unless explicitly committed.
pub struct PgErasureTransaction {
    transaction: Option<Transaction<'static, Postgres>>,
}

impl PgErasureTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, AppError> {
        self.transaction.as_mut().ok_or_else(|| {
            AppError::Internal("Erasure transaction already finished".to_string())
        })
    }
}

#[async_trait]
impl ErasureTransaction for PgErasureTransaction {
    async fn stored_paths(&mut self, session_id: Uuid) -> Result<Vec<String>, AppError> {
        let tx = self.tx()?;
        let rows = sqlx::query(
            r#"
            SELECT storage_path
            FROM documents
            WHERE session_id = $1
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::data_access("listing stored paths", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("storage_path")
                    .map_err(|e| AppError::data_access("reading stored path", e))
            })
            .collect()
    }

    async fn delete_artifacts(
        &mut self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError> {
        let sql = format!("DELETE FROM {} WHERE session_id = $1", kind.table_name());
        let tx = self.tx()?;
        let result = sqlx::query(&sql)
            .bind(session_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::data_access(format!("deleting {}", kind), e))?;
        Ok(result.rows_affected())
    }

    async fn delete_document_artifacts(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError> {
        let sql = format!(
            "DELETE FROM {} WHERE session_id = $1 AND document_id = $2",
            kind.table_name()
        );
        let tx = self.tx()?;
        let result = sqlx::query(&sql)
            .bind(session_id)
            .bind(document_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::data_access(format!("deleting {}", kind), e))?;
        Ok(result.rows_affected())
    }

    async fn delete_document(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<String>, AppError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE id = $1 AND session_id = $2
            RETURNING storage_path
            "#,
        )
        .bind(document_id)
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::data_access("deleting document", e))?;

        row.map(|row| {
            row.try_get::<String, _>("storage_path")
                .map_err(|e| AppError::data_access("reading stored path", e))
        })
        .transpose()
    }

    async fn delete_documents(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM documents WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::data_access("deleting documents", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_case(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM patient_cases WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::data_access("deleting case", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_session(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::data_access("deleting session", e))?;
        Ok(result.rows_affected())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .map_err(|e| AppError::data_access("committing erasure transaction", e))?;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()
                .await
                .map_err(|e| AppError::data_access("rolling back erasure transaction", e))?;
        }
        Ok(())
    }
}

impl Drop for PgErasureTransaction {
    fn drop(&mut self) {
        // sqlx rolls back a dropped transaction when its connection returns to the pool.
        if self.transaction.is_some() {
            tracing::warn!("Erasure transaction dropped without commit or rollback - rolling back");
        }
    }
}
