use async_trait::async_trait;
use oncolink_core::models::{NewDocument, PatientCase, UploadedDocument};
use oncolink_core::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::traits::DocumentRepository;

const DOCUMENT_COLUMNS: &str = "id, session_id, case_id, filename, storage_path, \
     declared_content_type, detected_content_type, category, size_bytes, anonymized_text, created_at";

/// Repository for patient cases and uploaded documents
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn ensure_case(&self, session_id: Uuid) -> Result<PatientCase, AppError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let case = sqlx::query_as::<_, PatientCase>(
            r#"
            INSERT INTO patient_cases (id, session_id)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET session_id = EXCLUDED.session_id
            RETURNING id, session_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::data_access("ensuring case", e))?;

        Ok(case)
    }

    async fn insert_document(&self, document: NewDocument) -> Result<UploadedDocument, AppError> {
        let sql = format!(
            r#"
            INSERT INTO documents (
                id, session_id, case_id, filename, storage_path,
                declared_content_type, detected_content_type, category, size_bytes, anonymized_text
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );

        let inserted = sqlx::query_as::<_, UploadedDocument>(&sql)
            .bind(Uuid::new_v4())
            .bind(document.session_id)
            .bind(document.case_id)
            .bind(document.filename)
            .bind(document.storage_path)
            .bind(document.declared_content_type)
            .bind(document.detected_content_type)
            .bind(document.category)
            .bind(document.size_bytes)
            .bind(document.anonymized_text)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::data_access("inserting document", e))?;

        tracing::debug!(
            document_id = %inserted.id,
            session_id = %inserted.session_id,
            "Document record inserted"
        );

        Ok(inserted)
    }

    async fn get_document(
        &self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<UploadedDocument>, AppError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE id = $1 AND session_id = $2",
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, UploadedDocument>(&sql)
            .bind(document_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::data_access("loading document", e))?;

        Ok(document)
    }

    async fn list_documents(&self, session_id: Uuid) -> Result<Vec<UploadedDocument>, AppError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE session_id = $1 ORDER BY created_at",
            DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, UploadedDocument>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::data_access("listing documents", e))?;

        Ok(documents)
    }
}
