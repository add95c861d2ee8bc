//! Document ingestion.
//!
//! An upload passes, in order: session id check, content sniff against the declared type,
//! DICOM structural parse (imaging only), the type allow-list, then encrypted staging
//! through the storage port. The staged object is read back, decrypted, and routed to the
//! imaging or report path. It is deleted before `process_document` returns, whatever the
//! outcome.
//!
//! Re-running an upload after a partial failure creates new records; deduplication is the
//! caller's concern.

mod meter;
mod temp;

use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use oncolink_core::models::{
    ArtifactKind, DocumentCategory, Finding, NewArtifact, NewDocument, UploadedDocument,
};
use oncolink_core::{AppError, AppResult, ByteReader, Capability, RequestContext, SecureStream};
use oncolink_db::{ArtifactRepository, DocumentRepository};
use oncolink_processing::{
    classify_report, parse_dicom, sniff, AnalysisService, Anonymizer, ContentFamily,
    DetectedType, DicomHeader, ImagingInput, TextExtractor, UploadValidator, ValidationError,
    DICOM_HEADER_READ_LIMIT, SNIFF_LEN,
};
use oncolink_storage::{temp_object_key, Storage};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use meter::{MeteredReader, UploadMeter};
use temp::TempArtifact;

/// Content type passed to storage for staged objects; the payload is ciphertext.
const STAGED_CONTENT_TYPE: &str = "application/octet-stream";

/// Summary of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutcome {
    pub document_id: Uuid,
    pub session_id: Uuid,
    pub category: DocumentCategory,
    pub detected_content_type: String,
    pub size_bytes: u64,
    pub artifact_count: usize,
}

/// Collaborators and settings for an [`IngestionPipeline`].
pub struct IngestionDeps {
    pub storage: Arc<dyn Storage>,
    pub secure_stream: SecureStream,
    pub documents: Arc<dyn DocumentRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub analysis: Arc<dyn AnalysisService>,
    pub validator: UploadValidator,
    pub anonymizer: Anonymizer,
    /// Bound on each collaborator call, separate from the request deadline.
    pub analysis_timeout: Duration,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    storage: Arc<dyn Storage>,
    secure_stream: SecureStream,
    documents: Arc<dyn DocumentRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    text_extractor: Arc<dyn TextExtractor>,
    analysis: Arc<dyn AnalysisService>,
    validator: UploadValidator,
    anonymizer: Arc<Anonymizer>,
    analysis_timeout: Duration,
}

/// What is known about an upload once it is staged.
struct StagedUpload {
    session_id: Uuid,
    filename: String,
    declared_content_type: String,
    detected: DetectedType,
    dicom_header: Option<DicomHeader>,
    storage_path: String,
}

impl IngestionPipeline {
    pub fn new(deps: IngestionDeps) -> Self {
        Self {
            storage: deps.storage,
            secure_stream: deps.secure_stream,
            documents: deps.documents,
            artifacts: deps.artifacts,
            text_extractor: deps.text_extractor,
            analysis: deps.analysis,
            validator: deps.validator,
            anonymizer: Arc::new(deps.anonymizer),
            analysis_timeout: deps.analysis_timeout,
        }
    }

    /// Validate, stage, analyse and persist one uploaded document.
    #[tracing::instrument(
        skip(self, ctx, filename, content),
        fields(request_id = %ctx.request_id(), session_id = %session_id)
    )]
    pub async fn process_document(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        filename: &str,
        declared_content_type: &str,
        mut content: ByteReader,
    ) -> AppResult<IngestionOutcome> {
        let start = std::time::Instant::now();

        let session_id =
            Uuid::parse_str(session_id.trim()).map_err(|_| ValidationError::InvalidSessionId)?;

        let mut prefix = Vec::with_capacity(SNIFF_LEN);
        ctx.run("sniff_upload", read_upto(&mut content, &mut prefix, SNIFF_LEN))
            .await?;
        let detected =
            self.validator
                .validate_declared_matches(declared_content_type, sniff(&prefix), prefix.len())?;

        let dicom_header = if detected.family == ContentFamily::Imaging {
            ctx.run(
                "read_dicom_header",
                read_upto(&mut content, &mut prefix, DICOM_HEADER_READ_LIMIT),
            )
            .await?;
            let truncated = prefix.len() >= DICOM_HEADER_READ_LIMIT;
            let header =
                parse_dicom(&prefix, truncated).map_err(|e| AppError::StructuralParse {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                })?;
            Some(header)
        } else {
            None
        };

        self.validator.validate_content_type(&detected)?;

        let storage_path = self
            .stage(ctx, session_id, filename, prefix, content)
            .await?;
        let staged = StagedUpload {
            session_id,
            filename: filename.to_string(),
            declared_content_type: declared_content_type.to_string(),
            detected,
            dicom_header,
            storage_path: storage_path.clone(),
        };

        let guard = TempArtifact::new(self.storage.clone(), storage_path);
        let result = ctx.run("process_document", self.process_staged(staged)).await;
        guard.release().await;

        match &result {
            Ok(outcome) => tracing::info!(
                document_id = %outcome.document_id,
                category = %outcome.category,
                artifact_count = outcome.artifact_count,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Document ingested"
            ),
            Err(e) => tracing::warn!(
                error_type = e.error_type(),
                capability = e.capability().map(|c| c.as_str()),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Document ingestion failed"
            ),
        }

        result
    }

    /// One document of a session. Missing documents (including those of erased sessions)
    /// are `NotFound`.
    pub async fn get_document(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        document_id: Uuid,
    ) -> AppResult<UploadedDocument> {
        ctx.run("get_document", async {
            self.documents
                .get_document(session_id, document_id)
                .await
                .map_err(|e| e.into_data_access("loading document"))
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {}", document_id)))
    }

    pub async fn list_documents(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
    ) -> AppResult<Vec<UploadedDocument>> {
        ctx.run("list_documents", async {
            self.documents
                .list_documents(session_id)
                .await
                .map_err(|e| e.into_data_access("listing documents"))
        })
        .await
    }

    /// Encrypt the upload into storage, enforcing the size limit while streaming.
    async fn stage(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        filename: &str,
        prefix: Vec<u8>,
        rest: ByteReader,
    ) -> AppResult<String> {
        let key = temp_object_key(session_id, ctx.request_id(), filename);
        let meter = Arc::new(UploadMeter::default());
        let plaintext = MeteredReader::new(
            Cursor::new(prefix).chain(rest),
            self.validator.max_upload_size(),
            meter.clone(),
        );
        let ciphertext = self.secure_stream.encrypt_stream(plaintext);

        let saved = ctx
            .run("stage_upload", async {
                self.storage
                    .save(&key, STAGED_CONTENT_TYPE, ciphertext)
                    .await
                    .map_err(AppError::from)
            })
            .await;

        match saved {
            Ok(path) => {
                tracing::debug!(storage_key = %path, size_bytes = meter.bytes(), "Upload staged");
                Ok(path)
            }
            Err(e) => {
                // Backends remove partial objects on error, but not when the save was
                // interrupted by cancellation.
                if let Err(cleanup) = self.storage.delete(&key).await {
                    tracing::warn!(
                        error = %cleanup,
                        storage_key = %key,
                        "Failed to remove partially staged upload"
                    );
                }
                if meter.exceeded() {
                    self.validator.validate_size(meter.bytes())?;
                }
                Err(match e {
                    e @ (AppError::Cancelled(_) | AppError::DeadlineExceeded(_)) => e,
                    other => other.into_data_access("staging upload"),
                })
            }
        }
    }

    async fn process_staged(&self, staged: StagedUpload) -> AppResult<IngestionOutcome> {
        let data = self.read_back(&staged.storage_path).await?;

        match staged.detected.family {
            ContentFamily::Imaging => self.process_imaging(staged, data).await,
            ContentFamily::Pdf | ContentFamily::RasterImage => {
                self.process_report(staged, data).await
            }
        }
    }

    /// Decrypt the staged object; authentication failures surface as `Integrity`.
    async fn read_back(&self, path: &str) -> AppResult<Bytes> {
        let reader = self
            .storage
            .get(path)
            .await
            .map_err(|e| AppError::from(e).into_data_access("reading staged upload"))?;
        let plaintext = self.secure_stream.decrypt_to_vec(reader).await?;
        Ok(Bytes::from(plaintext))
    }

    async fn process_imaging(
        &self,
        mut staged: StagedUpload,
        data: Bytes,
    ) -> AppResult<IngestionOutcome> {
        let mut header = staged.dicom_header.take().ok_or_else(|| {
            AppError::Internal("Imaging upload staged without a parsed header".to_string())
        })?;
        let stripped = self.anonymizer.anonymize_dicom(&mut header);
        tracing::debug!(elements_stripped = stripped, "Imaging header anonymized");

        let metadata = header.to_metadata_json();
        let size_bytes = data.len() as u64;
        let document = self
            .persist_document(&staged, DocumentCategory::Imaging, size_bytes, None)
            .await?;

        self.persist_artifact(NewArtifact {
            session_id: staged.session_id,
            document_id: Some(document.id),
            kind: ArtifactKind::ImagingMetadata,
            payload: metadata.clone(),
        })
        .await?;

        let input = ImagingInput {
            content_type: staged.detected.mime.to_string(),
            modality: header.modality().map(String::from),
            metadata,
        };
        let findings = self
            .call(
                Capability::ImagingAnalysis,
                self.analysis.detect_imaging_findings(&input),
            )
            .await?;
        let persisted = self.persist_findings(&document, &findings).await?;

        Ok(outcome(&staged, &document, size_bytes, persisted + 1))
    }

    async fn process_report(
        &self,
        staged: StagedUpload,
        data: Bytes,
    ) -> AppResult<IngestionOutcome> {
        let size_bytes = data.len() as u64;
        let extracted = self
            .call(
                Capability::TextExtraction,
                self.text_extractor
                    .extract_text(data, staged.detected.mime),
            )
            .await?;
        if extracted.text.trim().is_empty() {
            return Err(AppError::external(
                Capability::TextExtraction,
                anyhow::anyhow!("No text could be extracted from the document"),
            ));
        }

        let text = self.anonymizer.anonymize_text(&extracted.text);
        let category = classify_report(&text);
        tracing::debug!(category = %category, text_len = text.len(), "Report classified");

        let document = self
            .persist_document(&staged, category, size_bytes, Some(text.clone()))
            .await?;

        self.persist_artifact(NewArtifact {
            session_id: staged.session_id,
            document_id: Some(document.id),
            kind: ArtifactKind::ReportText,
            payload: serde_json::json!({
                "category": category,
                "characters": text.chars().count(),
                "extraction_confidence": extracted.confidence,
            }),
        })
        .await?;

        let findings = match category {
            DocumentCategory::Pathology => {
                self.call(
                    Capability::PathologyAnalysis,
                    self.analysis.analyze_pathology_text(&text),
                )
                .await?
            }
            _ => {
                self.call(
                    Capability::InformationExtraction,
                    self.analysis.extract_general_findings(&text),
                )
                .await?
            }
        };
        let persisted = self.persist_findings(&document, &findings).await?;

        Ok(outcome(&staged, &document, size_bytes, persisted + 1))
    }

    async fn persist_document(
        &self,
        staged: &StagedUpload,
        category: DocumentCategory,
        size_bytes: u64,
        anonymized_text: Option<String>,
    ) -> AppResult<UploadedDocument> {
        let case = self
            .documents
            .ensure_case(staged.session_id)
            .await
            .map_err(|e| e.into_data_access("ensuring case"))?;

        self.documents
            .insert_document(NewDocument {
                session_id: staged.session_id,
                case_id: case.id,
                filename: staged.filename.clone(),
                storage_path: staged.storage_path.clone(),
                declared_content_type: staged.declared_content_type.clone(),
                detected_content_type: staged.detected.mime.to_string(),
                category,
                size_bytes: size_bytes as i64,
                anonymized_text,
            })
            .await
            .map_err(|e| e.into_data_access("storing document"))
    }

    async fn persist_artifact(&self, artifact: NewArtifact) -> AppResult<()> {
        let kind = artifact.kind;
        self.artifacts
            .insert_artifact(artifact)
            .await
            .map_err(|e| e.into_data_access(&format!("storing {}", kind)))?;
        Ok(())
    }

    async fn persist_findings(
        &self,
        document: &UploadedDocument,
        findings: &[Finding],
    ) -> AppResult<usize> {
        let mut persisted = 0;
        for finding in findings {
            if !finding.kind.is_analysis_result() {
                tracing::warn!(kind = %finding.kind, "Ignoring finding of a non-analysis kind");
                continue;
            }
            self.persist_artifact(NewArtifact::from_finding(
                document.session_id,
                document.id,
                finding,
            ))
            .await?;
            persisted += 1;
        }
        Ok(persisted)
    }

    /// Run a collaborator call under the analysis timeout, tagging failures.
    async fn call<T, F>(&self, capability: Capability, fut: F) -> AppResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let start = std::time::Instant::now();
        let result = match tokio::time::timeout(self.analysis_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::external(capability, e)),
            Err(_) => Err(AppError::external(
                capability,
                anyhow::anyhow!("timed out after {:?}", self.analysis_timeout),
            )),
        };

        if let Err(e) = &result {
            tracing::warn!(
                capability = capability.as_str(),
                error = %e.detailed_message(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Collaborator call failed"
            );
        }
        result
    }
}

fn outcome(
    staged: &StagedUpload,
    document: &UploadedDocument,
    size_bytes: u64,
    artifact_count: usize,
) -> IngestionOutcome {
    IngestionOutcome {
        document_id: document.id,
        session_id: staged.session_id,
        category: document.category,
        detected_content_type: staged.detected.mime.to_string(),
        size_bytes,
        artifact_count,
    }
}

/// Append bytes from `reader` to `buf` until it holds `limit` bytes or the reader ends.
async fn read_upto<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> AppResult<()>
where
    R: AsyncRead + Unpin,
{
    let wanted = limit.saturating_sub(buf.len()) as u64;
    if wanted == 0 {
        return Ok(());
    }
    reader
        .take(wanted)
        .read_to_end(buf)
        .await
        .map_err(|e| AppError::data_access("reading upload", e))?;
    Ok(())
}
