//! De-identification of parsed DICOM headers and extracted report text.
//!
//! The identifier list is policy: the defaults cover the direct identifiers, and a JSON
//! policy file can replace them.

use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dicom::{DicomHeader, Tag};

/// A DICOM element to strip. With a `replacement` the value is overwritten instead of removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    #[serde(default)]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPattern {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationPolicy {
    #[serde(default = "default_tag_rules")]
    pub dicom_tags: Vec<TagRule>,
    #[serde(default = "default_true")]
    pub remove_private_tags: bool,
    #[serde(default = "default_text_patterns")]
    pub text_patterns: Vec<TextPattern>,
}

fn default_true() -> bool {
    true
}

fn remove(tag: &str) -> TagRule {
    TagRule {
        tag: tag.to_string(),
        replacement: None,
    }
}

fn replace(tag: &str, value: &str) -> TagRule {
    TagRule {
        tag: tag.to_string(),
        replacement: Some(value.to_string()),
    }
}

fn default_tag_rules() -> Vec<TagRule> {
    vec![
        replace("(0010,0010)", "ANONYMIZED"), // Patient's Name
        replace("(0010,0020)", "ANONYMIZED"), // Patient ID
        remove("(0010,0030)"),                // Patient's Birth Date
        remove("(0010,0040)"),                // Patient's Sex
        remove("(0010,1000)"),                // Other Patient IDs
        remove("(0010,1001)"),                // Other Patient Names
        remove("(0010,1040)"),                // Patient's Address
        remove("(0010,2154)"),                // Patient's Telephone Numbers
        remove("(0008,0050)"),                // Accession Number
        remove("(0008,0080)"),                // Institution Name
        remove("(0008,0081)"),                // Institution Address
        remove("(0008,0090)"),                // Referring Physician's Name
        remove("(0008,1048)"),                // Physician(s) of Record
        remove("(0008,1050)"),                // Performing Physician's Name
        remove("(0008,1070)"),                // Operators' Name
    ]
}

fn pattern(name: &str, pattern: &str, replacement: &str) -> TextPattern {
    TextPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
        replacement: replacement.to_string(),
    }
}

// Applied in order; dates and record numbers go before the phone pattern.
fn default_text_patterns() -> Vec<TextPattern> {
    vec![
        pattern(
            "email",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            "[EMAIL]",
        ),
        pattern("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
        pattern(
            "date",
            r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4})\b",
            "[DATE]",
        ),
        pattern(
            "record_number",
            r"(?i)\b(MRN|medical record(?: number)?|patient id|record no\.?)\s*[:#]?\s*[A-Z0-9-]{4,}",
            "${1}: [ID]",
        ),
        pattern(
            "phone",
            r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b",
            "[PHONE]",
        ),
        pattern(
            "labelled_name",
            r"(?i)\b(patient name|patient|name|referring physician|physician|attending)\s*:[ \t]*[^\n,;]+",
            "${1}: [NAME]",
        ),
    ]
}

impl Default for AnonymizationPolicy {
    fn default() -> Self {
        Self {
            dicom_tags: default_tag_rules(),
            remove_private_tags: true,
            text_patterns: default_text_patterns(),
        }
    }
}

impl AnonymizationPolicy {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid anonymization policy")
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read anonymization policy {}", path.display())
        })?;
        Self::from_json_str(&json)
    }
}

/// Compiled form of an [`AnonymizationPolicy`].
#[derive(Debug, Clone)]
pub struct Anonymizer {
    tag_rules: Vec<(Tag, Option<String>)>,
    remove_private_tags: bool,
    patterns: Vec<(Regex, String)>,
}

impl Anonymizer {
    pub fn new(policy: &AnonymizationPolicy) -> anyhow::Result<Self> {
        let tag_rules = policy
            .dicom_tags
            .iter()
            .map(|rule| {
                let tag = rule
                    .tag
                    .parse::<Tag>()
                    .map_err(|e| anyhow::anyhow!(e))?;
                Ok((tag, rule.replacement.clone()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let patterns = policy
            .text_patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(&p.pattern)
                    .with_context(|| format!("Invalid text pattern '{}'", p.name))?;
                Ok((regex, p.replacement.clone()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            tag_rules,
            remove_private_tags: policy.remove_private_tags,
            patterns,
        })
    }

    /// Strip or overwrite identifying elements in place. Returns the number of elements touched.
    pub fn anonymize_dicom(&self, header: &mut DicomHeader) -> usize {
        let before = header.elements.len();
        let mut replaced = 0;

        for (tag, replacement) in &self.tag_rules {
            match replacement {
                Some(value) if header.get(*tag).is_some() => {
                    header.replace(*tag, value);
                    replaced += 1;
                }
                Some(_) => {}
                None => {
                    header.remove(*tag);
                }
            }
        }

        if self.remove_private_tags {
            header.retain(|tag| !tag.is_private());
        }

        replaced + (before - header.elements.len())
    }

    pub fn anonymize_text(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }
}
