//! Prompt templates, one per capability.
//!
//! Templates are read lazily from `{dir}/{capability}.txt` and cached for the life of the
//! process. A missing file falls back to the built-in default. Placeholders use
//! `{{name}}`.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use oncolink_core::Capability;

const FINDINGS_FORMAT: &str = "Respond with JSON only: an array of objects with the fields \
\"kind\" (one of \"finding\", \"nodule\", \"diagnosis\", \"stage\", \"treatment_recommendation\"), \
\"label\" (a short statement), \"detail\" (an object with supporting values) and \"confidence\" \
(a number between 0 and 1). Return [] when nothing is found.";

fn builtin(capability: Capability) -> String {
    match capability {
        Capability::ImagingAnalysis => format!(
            "You are assisting an oncology team. The following is anonymized DICOM header \
metadata for a {{{{modality}}}} study.\n\n{{{{metadata}}}}\n\nList the imaging observations \
that can be derived from it, including nodules with their size and location when present.\n\n{}",
            FINDINGS_FORMAT
        ),
        Capability::TextExtraction => "Transcribe all text in this scanned medical document \
exactly as written. Output the plain text only, without commentary."
            .to_string(),
        Capability::PathologyAnalysis => format!(
            "You are assisting an oncology team. Read this anonymized pathology report and \
extract the diagnosis, tumour grade, stage (TNM when stated) and any treatment \
recommendations.\n\nReport:\n{{{{text}}}}\n\n{}",
            FINDINGS_FORMAT
        ),
        Capability::InformationExtraction => format!(
            "You are assisting an oncology team. Read this anonymized medical report and \
extract the clinically relevant findings.\n\nReport:\n{{{{text}}}}\n\n{}",
            FINDINGS_FORMAT
        ),
    }
}

pub struct PromptTemplates {
    dir: Option<PathBuf>,
    cache: DashMap<Capability, Arc<str>>,
}

impl PromptTemplates {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: DashMap::new(),
        }
    }

    pub async fn get(&self, capability: Capability) -> Arc<str> {
        let cached = self.cache.get(&capability).map(|t| t.value().clone());
        if let Some(template) = cached {
            return template;
        }

        let loaded = self.load(capability).await;
        // A concurrent load may have won; keep whichever was inserted first.
        self.cache
            .entry(capability)
            .or_insert(loaded)
            .value()
            .clone()
    }

    /// The template for `capability` with each `{{name}}` replaced by its value.
    pub async fn render(&self, capability: Capability, vars: &[(&str, &str)]) -> String {
        let template = self.get(capability).await;
        vars.iter().fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{{{}}}}}", name), value)
        })
    }

    async fn load(&self, capability: Capability) -> Arc<str> {
        let Some(dir) = &self.dir else {
            return Arc::from(builtin(capability));
        };

        let path = dir.join(format!("{}.txt", capability.as_str()));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "Loaded prompt template");
                Arc::from(contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Arc::from(builtin(capability)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read prompt template, using built-in default"
                );
                Arc::from(builtin(capability))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builtin_templates_have_placeholders() {
        let templates = PromptTemplates::new(None);

        let imaging = templates.get(Capability::ImagingAnalysis).await;
        assert!(imaging.contains("{{metadata}}"));
        assert!(imaging.contains("{{modality}}"));
        let pathology = templates.get(Capability::PathologyAnalysis).await;
        assert!(pathology.contains("{{text}}"));
    }

    #[tokio::test]
    async fn test_render_substitutes_values() {
        let templates = PromptTemplates::new(None);
        let prompt = templates
            .render(Capability::InformationExtraction, &[("text", "Impression: stable.")])
            .await;
        assert!(prompt.contains("Impression: stable."));
        assert!(!prompt.contains("{{text}}"));
    }

    #[tokio::test]
    async fn test_directory_overrides_and_is_cached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pathology_analysis.txt");
        std::fs::write(&path, "Custom: {{text}}").unwrap();

        let templates = PromptTemplates::new(Some(dir.path().to_path_buf()));
        let rendered = templates
            .render(Capability::PathologyAnalysis, &[("text", "grade 2")])
            .await;
        assert_eq!(rendered, "Custom: grade 2");

        // Later edits are not picked up.
        std::fs::write(&path, "Changed: {{text}}").unwrap();
        assert_eq!(
            &*templates.get(Capability::PathologyAnalysis).await,
            "Custom: {{text}}"
        );

        // Capabilities without a file use the default.
        let general = templates.get(Capability::InformationExtraction).await;
        assert!(general.contains("{{text}}"));
        assert!(general.starts_with("You are assisting"));
    }
}
