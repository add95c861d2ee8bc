//! Scripted text extraction and analysis collaborators.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use oncolink_core::models::{ArtifactKind, Finding};
use oncolink_core::Capability;
use oncolink_processing::{AnalysisService, ExtractedText, ImagingInput, TextExtractor};

/// How a scripted collaborator answers.
#[derive(Debug, Clone)]
pub enum Script {
    Findings(Vec<Finding>),
    Fail(String),
    Hang,
}

pub struct ScriptedAnalysis {
    script: Mutex<Script>,
    failing: Mutex<Option<Capability>>,
    calls: Mutex<Vec<Capability>>,
    imaging_inputs: Mutex<Vec<ImagingInput>>,
    texts: Mutex<Vec<String>>,
}

impl ScriptedAnalysis {
    pub fn returning(findings: Vec<Finding>) -> Self {
        Self {
            script: Mutex::new(Script::Findings(findings)),
            failing: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            imaging_inputs: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Every capability answers with `script`.
    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Only `capability` fails; the others follow the script.
    pub fn fail_only(&self, capability: Capability) {
        *self.failing.lock().unwrap() = Some(capability);
    }

    pub fn calls(&self) -> Vec<Capability> {
        self.calls.lock().unwrap().clone()
    }

    pub fn imaging_inputs(&self) -> Vec<ImagingInput> {
        self.imaging_inputs.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    async fn answer(&self, capability: Capability) -> anyhow::Result<Vec<Finding>> {
        self.calls.lock().unwrap().push(capability);
        if *self.failing.lock().unwrap() == Some(capability) {
            anyhow::bail!("{} unavailable", capability);
        }
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Findings(findings) => Ok(findings),
            Script::Fail(message) => Err(anyhow::anyhow!(message)),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysis {
    async fn detect_imaging_findings(&self, input: &ImagingInput) -> anyhow::Result<Vec<Finding>> {
        self.imaging_inputs.lock().unwrap().push(input.clone());
        self.answer(Capability::ImagingAnalysis).await
    }

    async fn analyze_pathology_text(&self, text: &str) -> anyhow::Result<Vec<Finding>> {
        self.texts.lock().unwrap().push(text.to_string());
        self.answer(Capability::PathologyAnalysis).await
    }

    async fn extract_general_findings(&self, text: &str) -> anyhow::Result<Vec<Finding>> {
        self.texts.lock().unwrap().push(text.to_string());
        self.answer(Capability::InformationExtraction).await
    }
}

pub struct ScriptedExtractor {
    text: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn returning(text: &str) -> Self {
        Self {
            text: Mutex::new(Some(text.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Subsequent calls fail.
    pub fn fail(&self) {
        *self.text.lock().unwrap() = None;
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = Some(text.to_string());
    }

    /// Content types of each call.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextExtractor for ScriptedExtractor {
    async fn extract_text(&self, _data: Bytes, content_type: &str) -> anyhow::Result<ExtractedText> {
        self.calls.lock().unwrap().push(content_type.to_string());
        match self.text.lock().unwrap().clone() {
            Some(text) => Ok(ExtractedText {
                text,
                confidence: Some(0.93),
            }),
            None => Err(anyhow::anyhow!("OCR engine unavailable")),
        }
    }
}

pub fn finding(kind: ArtifactKind, label: &str) -> Finding {
    Finding {
        kind,
        label: label.to_string(),
        detail: serde_json::json!({}),
        confidence: Some(0.8),
    }
}
