//! Repository trait abstractions
//!
//! These traits define the interface the services need from persistence, allowing for
//! in-memory implementations in tests. Every method surfaces `NotFound` or `DataAccess`.

use async_trait::async_trait;
use oncolink_core::error::AppError;
use oncolink_core::models::{
    Artifact, ArtifactKind, NewArtifact, NewDocument, PatientCase, Session, UploadedDocument,
};
use uuid::Uuid;

/// Session persistence.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError>;

    /// Atomically set `used = true` only if it is currently false.
    ///
    /// Returns `true` when this call performed the transition.
    async fn mark_used_if_unused(&self, token_hash: &str) -> Result<bool, AppError>;
}

/// Case and document persistence.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Return the session's case, creating it if absent. Idempotent under concurrency.
    async fn ensure_case(&self, session_id: Uuid) -> Result<PatientCase, AppError>;

    async fn insert_document(&self, document: NewDocument) -> Result<UploadedDocument, AppError>;

    async fn get_document(
        &self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<UploadedDocument>, AppError>;

    async fn list_documents(&self, session_id: Uuid) -> Result<Vec<UploadedDocument>, AppError>;
}

/// Derived artifact persistence (one table per kind).
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<Artifact, AppError>;

    async fn list_artifacts(
        &self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<Vec<Artifact>, AppError>;
}

/// Opens erasure transactions.
#[async_trait]
pub trait ErasureStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ErasureTransaction>, AppError>;
}

/// Record deletions performed atomically. Dropping without `commit` rolls back.
#[async_trait]
pub trait ErasureTransaction: Send {
    /// Storage paths of every document owned by the session, locking those rows.
    async fn stored_paths(&mut self, session_id: Uuid) -> Result<Vec<String>, AppError>;

    async fn delete_artifacts(
        &mut self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError>;

    async fn delete_document_artifacts(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError>;

    /// Delete one document row, returning its storage path when it existed.
    async fn delete_document(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<String>, AppError>;

    async fn delete_documents(&mut self, session_id: Uuid) -> Result<u64, AppError>;

    async fn delete_case(&mut self, session_id: Uuid) -> Result<u64, AppError>;

    async fn delete_session(&mut self, session_id: Uuid) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
