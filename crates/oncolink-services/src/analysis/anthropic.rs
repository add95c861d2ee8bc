//! Analysis and OCR through the Anthropic Messages API.
//!
//! Imaging analysis sends the anonymized header metadata only; pixel data never leaves the
//! process. Report analysis sends anonymized text. OCR sends the scanned image itself.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use oncolink_core::models::{ArtifactKind, Finding};
use oncolink_core::{Capability, Config};
use oncolink_processing::{AnalysisService, ExtractedText, ImagingInput, TextExtractor};
use serde::{Deserialize, Serialize};

use super::templates::PromptTemplates;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Media types the Messages API accepts in image blocks.
const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    /// Scheme and host, without the `/v1` suffix.
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Debug for AnthropicConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AnthropicConfig {
    /// `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.anthropic_api_key.clone()?;
        Some(Self {
            api_key,
            model: config.anthropic_model.clone(),
            base_url: config.anthropic_base_url.trim_end_matches('/').to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: config.analysis_timeout(),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlockResponse>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockResponse {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Finding as the model writes it; `kind` is free text.
#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    kind: Option<String>,
    #[serde(alias = "description", alias = "text")]
    label: String,
    #[serde(default)]
    detail: serde_json::Value,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FindingsPayload {
    List(Vec<RawFinding>),
    Wrapped { findings: Vec<RawFinding> },
}

pub struct AnthropicClient {
    http_client: reqwest::Client,
    config: AnthropicConfig,
    templates: Arc<PromptTemplates>,
}

impl Debug for AnthropicClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AnthropicClient")
            .field("model", &self.config.model)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig, templates: Arc<PromptTemplates>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client for the Anthropic API")?;

        Ok(Self {
            http_client,
            config,
            templates,
        })
    }

    async fn complete(
        &self,
        capability: Capability,
        content: Vec<ContentBlock>,
    ) -> anyhow::Result<String> {
        let body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![MessageParam {
                role: "user",
                content,
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to the Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Anthropic API request failed: {} - {}", status, error_text);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                capability = capability.as_str(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Anthropic call completed"
            );
        }

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlockResponse::Text { text } => Some(text),
                ContentBlockResponse::Other => None,
            })
            .collect();
        Ok(text)
    }

    async fn findings_for_text(
        &self,
        capability: Capability,
        text: &str,
        default_kind: ArtifactKind,
    ) -> anyhow::Result<Vec<Finding>> {
        let prompt = self.templates.render(capability, &[("text", text)]).await;
        let reply = self
            .complete(capability, vec![ContentBlock::Text { text: prompt }])
            .await?;
        parse_findings(&reply, default_kind)
    }
}

#[async_trait]
impl AnalysisService for AnthropicClient {
    async fn detect_imaging_findings(&self, input: &ImagingInput) -> anyhow::Result<Vec<Finding>> {
        let metadata = serde_json::to_string_pretty(&input.metadata)
            .context("Failed to serialize imaging metadata")?;
        let modality = input.modality.as_deref().unwrap_or("imaging");
        let prompt = self
            .templates
            .render(
                Capability::ImagingAnalysis,
                &[("metadata", metadata.as_str()), ("modality", modality)],
            )
            .await;

        let reply = self
            .complete(
                Capability::ImagingAnalysis,
                vec![ContentBlock::Text { text: prompt }],
            )
            .await?;
        parse_findings(&reply, ArtifactKind::Finding)
    }

    async fn analyze_pathology_text(&self, text: &str) -> anyhow::Result<Vec<Finding>> {
        self.findings_for_text(Capability::PathologyAnalysis, text, ArtifactKind::Diagnosis)
            .await
    }

    async fn extract_general_findings(&self, text: &str) -> anyhow::Result<Vec<Finding>> {
        self.findings_for_text(Capability::InformationExtraction, text, ArtifactKind::Finding)
            .await
    }
}

#[async_trait]
impl TextExtractor for AnthropicClient {
    async fn extract_text(&self, data: Bytes, content_type: &str) -> anyhow::Result<ExtractedText> {
        if !SUPPORTED_IMAGE_TYPES.contains(&content_type) {
            anyhow::bail!("OCR does not support {}", content_type);
        }

        let prompt = self.templates.get(Capability::TextExtraction).await;
        let content = vec![
            ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: content_type.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&data),
                },
            },
            ContentBlock::Text {
                text: prompt.to_string(),
            },
        ];

        let text = self.complete(Capability::TextExtraction, content).await?;
        Ok(ExtractedText {
            text,
            confidence: None,
        })
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let inner = if let Some(rest) = text.split("```json").nth(1) {
        rest
    } else if let Some(rest) = text.split("```").nth(1) {
        rest
    } else {
        return text;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Parse a findings reply: a JSON array, or an object with a `findings` array. Kinds the
/// model names loosely are mapped with [`ArtifactKind::from_label`]; unknown ones get
/// `default_kind`.
fn parse_findings(text: &str, default_kind: ArtifactKind) -> anyhow::Result<Vec<Finding>> {
    let payload: FindingsPayload = serde_json::from_str(strip_code_fence(text))
        .context("Failed to parse findings from model reply")?;
    let raw = match payload {
        FindingsPayload::List(list) => list,
        FindingsPayload::Wrapped { findings } => findings,
    };

    Ok(raw
        .into_iter()
        .filter(|f| !f.label.trim().is_empty())
        .map(|f| Finding {
            kind: f
                .kind
                .as_deref()
                .and_then(ArtifactKind::from_label)
                .unwrap_or(default_kind),
            label: f.label.trim().to_string(),
            detail: f.detail,
            confidence: f.confidence.map(|c| c.clamp(0.0, 1.0)),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: &str) -> AnthropicClient {
        AnthropicClient::new(
            AnthropicConfig {
                api_key: "test-api-key".to_string(),
                model: "claude-test".to_string(),
                base_url: base_url.to_string(),
                max_tokens: 512,
                timeout: Duration::from_secs(5),
            },
            Arc::new(PromptTemplates::new(None)),
        )
        .unwrap()
    }

    fn reply(text: &str) -> String {
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "usage": { "input_tokens": 120, "output_tokens": 40 }
        })
        .to_string()
    }

    #[test]
    fn test_parse_findings_accepts_fenced_array() {
        let text = "Here you go:\n```json\n[{\"kind\": \"nodules\", \"label\": \"8 mm nodule\", \
                    \"confidence\": 1.4}]\n```";
        let findings = parse_findings(text, ArtifactKind::Finding).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, ArtifactKind::Nodule);
        assert_eq!(findings[0].confidence, Some(1.0));
    }

    #[test]
    fn test_parse_findings_accepts_wrapped_object() {
        let text = r#"{"findings": [
            {"kind": "Treatment recommendation", "label": "Adjuvant chemotherapy"},
            {"kind": "something else", "description": "Ki-67 20%"},
            {"label": "   "}
        ]}"#;
        let findings = parse_findings(text, ArtifactKind::Diagnosis).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].kind, ArtifactKind::TreatmentRecommendation);
        assert_eq!(findings[1].kind, ArtifactKind::Diagnosis);
        assert_eq!(findings[1].label, "Ki-67 20%");
    }

    #[test]
    fn test_parse_findings_rejects_prose() {
        assert!(parse_findings("I could not find anything.", ArtifactKind::Finding).is_err());
    }

    #[tokio::test]
    async fn test_pathology_request_shape_and_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-api-key")
            .match_header("anthropic-version", API_VERSION)
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({ "model": "claude-test", "max_tokens": 512 })),
                Matcher::Regex("invasive ductal carcinoma".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply(
                r#"[{"kind": "diagnosis", "label": "Invasive ductal carcinoma", "detail": {"grade": 2}}]"#,
            ))
            .create_async()
            .await;

        let findings = client(&server.url())
            .analyze_pathology_text("Microscopic: invasive ductal carcinoma, grade 2.")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, ArtifactKind::Diagnosis);
        assert_eq!(findings[0].detail["grade"], 2);
    }

    #[tokio::test]
    async fn test_imaging_request_sends_metadata_only() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("1.2.826.0.1.3680043.2.2".to_string()),
                Matcher::Regex("CT".to_string()),
            ]))
            .with_status(200)
            .with_body(reply(r#"{"findings": []}"#))
            .create_async()
            .await;

        let input = ImagingInput {
            content_type: "application/dicom".to_string(),
            modality: Some("CT".to_string()),
            metadata: serde_json::json!({ "study_instance_uid": "1.2.826.0.1.3680043.2.2" }),
        };
        let findings = client(&server.url())
            .detect_imaging_findings(&input)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(529)
            .with_body(r#"{"type": "error", "error": {"type": "overloaded_error"}}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .extract_general_findings("Impression: stable.")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("529"));
    }

    #[tokio::test]
    async fn test_ocr_sends_image_block() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""type":"image","source":\{"type":"base64""#.to_string()),
                Matcher::Regex(r#""media_type":"image/png""#.to_string()),
            ]))
            .with_status(200)
            .with_body(reply("LABORATORY REPORT\nHemoglobin 12.1 g/dL"))
            .create_async()
            .await;

        let extracted = client(&server.url())
            .extract_text(Bytes::from_static(b"\x89PNG\r\n\x1a\n"), "image/png")
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(extracted.text.starts_with("LABORATORY REPORT"));
        assert_eq!(extracted.confidence, None);
    }

    #[tokio::test]
    async fn test_ocr_rejects_unsupported_media_type() {
        let client = client("http://127.0.0.1:9");
        let err = client
            .extract_text(Bytes::from_static(b"II*\0"), "image/tiff")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image/tiff"));
    }

    #[test]
    fn test_config_requires_api_key() {
        let lookup = |key: &str| match key {
            "DATABASE_URL" => Some("postgres://localhost/oncolink".to_string()),
            "LOCAL_STORAGE_PATH" => Some("/tmp/oncolink".to_string()),
            "ENCRYPTION_KEY" => Some(base64::engine::general_purpose::STANDARD.encode([1u8; 32])),
            _ => None,
        };
        let config = Config::from_lookup(lookup).unwrap();
        assert!(AnthropicConfig::from_config(&config).is_none());

        let with_key = Config::from_lookup(|key: &str| match key {
            "ANTHROPIC_API_KEY" => Some("sk-ant-test".to_string()),
            "ANTHROPIC_BASE_URL" => Some("http://localhost:8080/".to_string()),
            other => lookup(other),
        })
        .unwrap();
        let anthropic = AnthropicConfig::from_config(&with_key).unwrap();
        assert_eq!(anthropic.base_url, "http://localhost:8080");
        assert!(!format!("{:?}", anthropic).contains("sk-ant-test"));
    }
}
