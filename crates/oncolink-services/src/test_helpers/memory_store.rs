//! In-memory implementation of every repository port.
//!
//! The conditional `used` update runs under one lock, so it is atomic across tasks. Erasure
//! transactions work on a snapshot that replaces the shared state on commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use oncolink_core::models::{
    Artifact, ArtifactKind, NewArtifact, NewDocument, PatientCase, Session, UploadedDocument,
};
use oncolink_core::AppError;
use oncolink_db::{
    ArtifactRepository, DocumentRepository, ErasureStore, ErasureTransaction, SessionRepository,
};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    sessions: HashMap<Uuid, Session>,
    cases: HashMap<Uuid, PatientCase>,
    documents: Vec<UploadedDocument>,
    artifacts: Vec<(ArtifactKind, Artifact)>,
}

impl State {
    fn require_session(&self, session_id: Uuid) -> Result<(), AppError> {
        if self.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(AppError::data_access(
                "foreign key",
                format!("session {} does not exist", session_id),
            ))
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    token_lookups: AtomicUsize,
    fail_writes: AtomicBool,
    fail_artifact_writes: AtomicBool,
    fail_erasure_step: Arc<Mutex<Option<&'static str>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(&session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn document_count(&self, session_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .documents
            .iter()
            .filter(|d| d.session_id == session_id)
            .count()
    }

    pub fn artifact_count(&self, session_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .iter()
            .filter(|(_, a)| a.session_id == session_id)
            .count()
    }

    pub fn artifact_kinds(&self, session_id: Uuid) -> Vec<ArtifactKind> {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .iter()
            .filter(|(_, a)| a.session_id == session_id)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn has_case(&self, session_id: Uuid) -> bool {
        self.state.lock().unwrap().cases.contains_key(&session_id)
    }

    pub fn documents(&self, session_id: Uuid) -> Vec<UploadedDocument> {
        self.state
            .lock()
            .unwrap()
            .documents
            .iter()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Number of lookups by token digest so far.
    pub fn token_lookups(&self) -> usize {
        self.token_lookups.load(Ordering::SeqCst)
    }

    /// Fail every insert.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail artifact inserts only.
    pub fn fail_artifact_writes(&self, fail: bool) {
        self.fail_artifact_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the named erasure transaction step (`"delete_session"`, `"commit"`, ...).
    pub fn fail_erasure_step(&self, step: Option<&'static str>) {
        *self.fail_erasure_step.lock().unwrap() = step;
    }

    fn check_writes(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::data_access("insert", "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        self.check_writes()?;
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError> {
        self.token_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .unwrap()
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn mark_used_if_unused(&self, token_hash: &str) -> Result<bool, AppError> {
        // Yield first so concurrent callers interleave before the compare-and-set.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        match state
            .sessions
            .values_mut()
            .find(|s| s.token_hash == token_hash && !s.used)
        {
            Some(session) => {
                session.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn ensure_case(&self, session_id: Uuid) -> Result<PatientCase, AppError> {
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        state.require_session(session_id)?;
        let case = state
            .cases
            .entry(session_id)
            .or_insert_with(|| PatientCase {
                id: Uuid::new_v4(),
                session_id,
                created_at: Utc::now(),
            })
            .clone();
        Ok(case)
    }

    async fn insert_document(&self, document: NewDocument) -> Result<UploadedDocument, AppError> {
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        state.require_session(document.session_id)?;
        let stored = UploadedDocument {
            id: Uuid::new_v4(),
            session_id: document.session_id,
            case_id: document.case_id,
            filename: document.filename,
            storage_path: document.storage_path,
            declared_content_type: document.declared_content_type,
            detected_content_type: document.detected_content_type,
            category: document.category,
            size_bytes: document.size_bytes,
            anonymized_text: document.anonymized_text,
            created_at: Utc::now(),
        };
        state.documents.push(stored.clone());
        Ok(stored)
    }

    async fn get_document(
        &self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<UploadedDocument>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .documents
            .iter()
            .find(|d| d.session_id == session_id && d.id == document_id)
            .cloned())
    }

    async fn list_documents(&self, session_id: Uuid) -> Result<Vec<UploadedDocument>, AppError> {
        Ok(self.documents(session_id))
    }
}

#[async_trait]
impl ArtifactRepository for MemoryStore {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<Artifact, AppError> {
        self.check_writes()?;
        if self.fail_artifact_writes.load(Ordering::SeqCst) {
            return Err(AppError::data_access("insert", "injected artifact failure"));
        }
        let mut state = self.state.lock().unwrap();
        state.require_session(artifact.session_id)?;
        let stored = Artifact {
            id: Uuid::new_v4(),
            session_id: artifact.session_id,
            document_id: artifact.document_id,
            kind: Some(artifact.kind),
            payload: artifact.payload,
            created_at: Utc::now(),
        };
        state.artifacts.push((artifact.kind, stored.clone()));
        Ok(stored)
    }

    async fn list_artifacts(
        &self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<Vec<Artifact>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .artifacts
            .iter()
            .filter(|(k, a)| *k == kind && a.session_id == session_id)
            .map(|(_, a)| a.clone())
            .collect())
    }
}

#[async_trait]
impl ErasureStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ErasureTransaction>, AppError> {
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryTransaction {
            shared: self.state.clone(),
            working,
            fail_step: *self.fail_erasure_step.lock().unwrap(),
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<State>>,
    working: State,
    fail_step: Option<&'static str>,
}

impl MemoryTransaction {
    fn step(&self, name: &str) -> Result<(), AppError> {
        if self.fail_step == Some(name) {
            return Err(AppError::data_access(name.to_string(), "injected erasure failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ErasureTransaction for MemoryTransaction {
    async fn stored_paths(&mut self, session_id: Uuid) -> Result<Vec<String>, AppError> {
        self.step("stored_paths")?;
        Ok(self
            .working
            .documents
            .iter()
            .filter(|d| d.session_id == session_id)
            .map(|d| d.storage_path.clone())
            .collect())
    }

    async fn delete_artifacts(
        &mut self,
        session_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError> {
        self.step("delete_artifacts")?;
        let before = self.working.artifacts.len();
        self.working
            .artifacts
            .retain(|(k, a)| !(*k == kind && a.session_id == session_id));
        Ok((before - self.working.artifacts.len()) as u64)
    }

    async fn delete_document_artifacts(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
        kind: ArtifactKind,
    ) -> Result<u64, AppError> {
        self.step("delete_document_artifacts")?;
        let before = self.working.artifacts.len();
        self.working.artifacts.retain(|(k, a)| {
            !(*k == kind && a.session_id == session_id && a.document_id == Some(document_id))
        });
        Ok((before - self.working.artifacts.len()) as u64)
    }

    async fn delete_document(
        &mut self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<String>, AppError> {
        self.step("delete_document")?;
        let position = self
            .working
            .documents
            .iter()
            .position(|d| d.session_id == session_id && d.id == document_id);
        Ok(position.map(|i| self.working.documents.remove(i).storage_path))
    }

    async fn delete_documents(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        self.step("delete_documents")?;
        let before = self.working.documents.len();
        self.working.documents.retain(|d| d.session_id != session_id);
        Ok((before - self.working.documents.len()) as u64)
    }

    async fn delete_case(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        self.step("delete_case")?;
        Ok(self.working.cases.remove(&session_id).map_or(0, |_| 1))
    }

    async fn delete_session(&mut self, session_id: Uuid) -> Result<u64, AppError> {
        self.step("delete_session")?;
        Ok(self.working.sessions.remove(&session_id).map_or(0, |_| 1))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.step("commit")?;
        let MemoryTransaction { shared, working, .. } = *self;
        *shared.lock().unwrap() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
