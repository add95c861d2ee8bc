//! Collaborator ports consumed by the ingestion pipeline.
//!
//! Implementations return `anyhow::Error`; the pipeline tags failures with the capability
//! that produced them.

use async_trait::async_trait;
use bytes::Bytes;
use oncolink_core::models::Finding;

/// Text recovered from a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Extractor confidence in `[0, 1]`, when it reports one.
    pub confidence: Option<f32>,
}

/// Imaging study as seen by analysis: the anonymized header only. The uploaded bytes
/// still carry the original identifiers and never cross this port.
#[derive(Debug, Clone)]
pub struct ImagingInput {
    pub content_type: String,
    pub modality: Option<String>,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, data: Bytes, content_type: &str) -> anyhow::Result<ExtractedText>;
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn detect_imaging_findings(&self, input: &ImagingInput) -> anyhow::Result<Vec<Finding>>;

    async fn analyze_pathology_text(&self, text: &str) -> anyhow::Result<Vec<Finding>>;

    async fn extract_general_findings(&self, text: &str) -> anyhow::Result<Vec<Finding>>;
}
