//! Session and document erasure.
//!
//! Records are deleted inside one repository transaction, children before parents. Stored
//! objects are deleted only after the commit. A crash between the commit and the storage
//! deletes leaves orphaned objects behind: nothing references them any more, and they hold
//! ciphertext only, but they are not reclaimed automatically. The reverse order would be
//! worse, since a rolled-back transaction cannot bring deleted objects back.

use std::sync::Arc;

use oncolink_core::models::ArtifactKind;
use oncolink_core::{AppError, AppResult, RequestContext};
use oncolink_db::{ErasureStore, ErasureTransaction};
use oncolink_storage::Storage;
use serde::Serialize;
use uuid::Uuid;

/// What an erasure removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErasureReport {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    pub artifacts_deleted: u64,
    pub documents_deleted: u64,
    pub cases_deleted: u64,
    pub sessions_deleted: u64,
    pub storage_objects_deleted: u64,
    /// Stored objects whose deletion failed after the records were committed.
    pub storage_failures: u64,
}

impl ErasureReport {
    fn new(session_id: Uuid, document_id: Option<Uuid>) -> Self {
        Self {
            session_id,
            document_id,
            ..Default::default()
        }
    }

    /// Nothing was found to delete.
    pub fn is_noop(&self) -> bool {
        self.artifacts_deleted == 0
            && self.documents_deleted == 0
            && self.cases_deleted == 0
            && self.sessions_deleted == 0
            && self.storage_objects_deleted == 0
    }
}

pub struct SessionEraser {
    store: Arc<dyn ErasureStore>,
    storage: Arc<dyn Storage>,
}

impl SessionEraser {
    pub fn new(store: Arc<dyn ErasureStore>, storage: Arc<dyn Storage>) -> Self {
        Self { store, storage }
    }

    /// Delete everything owned by a session. Erasing an unknown or already erased session
    /// succeeds with an empty report.
    #[tracing::instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id(), session_id = %session_id)
    )]
    pub async fn erase_session(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
    ) -> AppResult<ErasureReport> {
        let start = std::time::Instant::now();
        let mut report = ErasureReport::new(session_id, None);

        let mut tx = self.begin(ctx).await?;
        let deleted = ctx
            .run(
                "erase_session",
                delete_session_records(tx.as_mut(), session_id, &mut report),
            )
            .await;
        let paths = match deleted {
            Ok(paths) => paths,
            Err(e) => return Err(abort(tx, e, "erasing session records").await),
        };
        tx.commit()
            .await
            .map_err(|e| e.into_data_access("committing session erasure"))?;

        self.delete_objects(&paths, &mut report).await;

        tracing::info!(
            artifacts_deleted = report.artifacts_deleted,
            documents_deleted = report.documents_deleted,
            sessions_deleted = report.sessions_deleted,
            storage_objects_deleted = report.storage_objects_deleted,
            storage_failures = report.storage_failures,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Session erased"
        );
        Ok(report)
    }

    /// Delete one document, its artifacts and its stored object. The session, its case and
    /// its other documents are untouched. A missing document is a no-op.
    #[tracing::instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id(), session_id = %session_id, document_id = %document_id)
    )]
    pub async fn erase_document(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        document_id: Uuid,
    ) -> AppResult<ErasureReport> {
        let mut report = ErasureReport::new(session_id, Some(document_id));

        let mut tx = self.begin(ctx).await?;
        let deleted = ctx
            .run(
                "erase_document",
                delete_document_records(tx.as_mut(), session_id, document_id, &mut report),
            )
            .await;
        let path = match deleted {
            Ok(path) => path,
            Err(e) => return Err(abort(tx, e, "erasing document records").await),
        };

        let Some(path) = path else {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "Rollback of empty document erasure failed");
            }
            tracing::debug!("Document not found; nothing to erase");
            return Ok(ErasureReport::new(session_id, Some(document_id)));
        };

        tx.commit()
            .await
            .map_err(|e| e.into_data_access("committing document erasure"))?;

        self.delete_objects(&[path], &mut report).await;

        tracing::info!(
            artifacts_deleted = report.artifacts_deleted,
            storage_objects_deleted = report.storage_objects_deleted,
            "Document erased"
        );
        Ok(report)
    }

    async fn begin(&self, ctx: &RequestContext) -> AppResult<Box<dyn ErasureTransaction>> {
        ctx.run("begin_erasure", async {
            self.store
                .begin()
                .await
                .map_err(|e| e.into_data_access("opening erasure transaction"))
        })
        .await
    }

    /// Best-effort: failures are logged and counted, never returned. Only objects that are
    /// still present count as deleted; ingestion normally removes its staged object itself.
    async fn delete_objects(&self, paths: &[String], report: &mut ErasureReport) {
        for path in paths {
            match self.storage.exists(path).await {
                Ok(false) => {
                    tracing::debug!(storage_key = %path, "Stored object already removed");
                    continue;
                }
                Ok(true) => {}
                Err(e) => tracing::warn!(
                    error = %e,
                    storage_key = %path,
                    "Could not check stored object, deleting anyway"
                ),
            }
            match self.storage.delete(path).await {
                Ok(()) => report.storage_objects_deleted += 1,
                Err(e) => {
                    report.storage_failures += 1;
                    tracing::error!(
                        error = %e,
                        storage_key = %path,
                        "Failed to delete stored object after erasure commit"
                    );
                }
            }
        }
    }
}

async fn delete_session_records(
    tx: &mut dyn ErasureTransaction,
    session_id: Uuid,
    report: &mut ErasureReport,
) -> AppResult<Vec<String>> {
    let paths = tx.stored_paths(session_id).await?;
    for kind in ArtifactKind::ERASURE_ORDER {
        report.artifacts_deleted += tx.delete_artifacts(session_id, kind).await?;
    }
    report.documents_deleted = tx.delete_documents(session_id).await?;
    report.cases_deleted = tx.delete_case(session_id).await?;
    report.sessions_deleted = tx.delete_session(session_id).await?;
    Ok(paths)
}

async fn delete_document_records(
    tx: &mut dyn ErasureTransaction,
    session_id: Uuid,
    document_id: Uuid,
    report: &mut ErasureReport,
) -> AppResult<Option<String>> {
    for kind in ArtifactKind::ERASURE_ORDER {
        report.artifacts_deleted += tx
            .delete_document_artifacts(session_id, document_id, kind)
            .await?;
    }
    let path = tx.delete_document(session_id, document_id).await?;
    if path.is_some() {
        report.documents_deleted = 1;
    }
    Ok(path)
}

/// Roll back after a failed step and pick the error to return.
async fn abort(tx: Box<dyn ErasureTransaction>, error: AppError, context: &str) -> AppError {
    if let Err(rollback) = tx.rollback().await {
        tracing::error!(error = %rollback, "Erasure rollback failed");
    }
    match error {
        e @ (AppError::Cancelled(_) | AppError::DeadlineExceeded(_)) => e,
        other => other.into_data_access(context),
    }
}
