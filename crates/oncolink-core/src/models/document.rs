use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// How an uploaded document was routed through analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "document_category", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    Imaging,
    Pathology,
    Radiology,
    Lab,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Imaging => "imaging",
            DocumentCategory::Pathology => "pathology",
            DocumentCategory::Radiology => "radiology",
            DocumentCategory::Lab => "lab",
        }
    }
}

impl Display for DocumentCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "imaging" => Ok(DocumentCategory::Imaging),
            "pathology" => Ok(DocumentCategory::Pathology),
            "radiology" => Ok(DocumentCategory::Radiology),
            "lab" => Ok(DocumentCategory::Lab),
            _ => Err(anyhow::anyhow!("Invalid document category: {}", s)),
        }
    }
}

/// Session-scoped parent record that groups a patient's documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PatientCase {
    pub id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A document accepted by the ingestion pipeline. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UploadedDocument {
    pub id: Uuid,
    pub session_id: Uuid,
    pub case_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub declared_content_type: String,
    pub detected_content_type: String,
    pub category: DocumentCategory,
    pub size_bytes: i64,
    /// Anonymized extracted text (document path only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymized_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`UploadedDocument`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub session_id: Uuid,
    pub case_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub declared_content_type: String,
    pub detected_content_type: String,
    pub category: DocumentCategory,
    pub size_bytes: i64,
    pub anonymized_text: Option<String>,
}
