use async_trait::async_trait;
use oncolink_core::models::{Artifact, ArtifactKind, NewArtifact};
use oncolink_core::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::traits::ArtifactRepository;

/// Repository for derived artifacts. Table names come from [`ArtifactKind::table_name`],
/// never from input.
#[derive(Clone)]
pub struct PgArtifactRepository {
    pool: PgPool,
}

impl PgArtifactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<Artifact, AppError> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, session_id, document_id, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, session_id, document_id, payload, created_at
            "#,
            artifact.kind.table_name()
        );

        let mut inserted = sqlx::query_as::<_, Artifact>(&sql)
            .bind(Uuid::new_v4())
            .bind(artifact.session_id)
            .bind(artifact.document_id)
            .bind(&artifact.payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::data_access(format!("inserting {}", artifact.kind), e))?;

        inserted.kind = Some(artifact.kind);
        Ok(inserted)
    }

    async fn list_artifacts(
        &self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<Vec<Artifact>, AppError> {
        let sql = format!(
            r#"
            SELECT id, session_id, document_id, payload, created_at
            FROM {}
            WHERE session_id = $1
            ORDER BY created_at
            "#,
            kind.table_name()
        );

        let mut artifacts = sqlx::query_as::<_, Artifact>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::data_access(format!("listing {}", kind), e))?;

        for artifact in &mut artifacts {
            artifact.kind = Some(kind);
        }
        Ok(artifacts)
    }
}
