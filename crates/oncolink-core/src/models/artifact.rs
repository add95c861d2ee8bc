use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Kind of derived result. Each kind is persisted in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ImagingMetadata,
    ReportText,
    Finding,
    Nodule,
    Diagnosis,
    Stage,
    TreatmentRecommendation,
}

impl ArtifactKind {
    /// Deletion order: dependents before the records they are derived from.
    pub const ERASURE_ORDER: [ArtifactKind; 7] = [
        ArtifactKind::TreatmentRecommendation,
        ArtifactKind::Stage,
        ArtifactKind::Diagnosis,
        ArtifactKind::Nodule,
        ArtifactKind::Finding,
        ArtifactKind::ReportText,
        ArtifactKind::ImagingMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::ImagingMetadata => "imaging_metadata",
            ArtifactKind::ReportText => "report_text",
            ArtifactKind::Finding => "finding",
            ArtifactKind::Nodule => "nodule",
            ArtifactKind::Diagnosis => "diagnosis",
            ArtifactKind::Stage => "stage",
            ArtifactKind::TreatmentRecommendation => "treatment_recommendation",
        }
    }

    /// Backing table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            ArtifactKind::ImagingMetadata => "imaging_metadata",
            ArtifactKind::ReportText => "report_texts",
            ArtifactKind::Finding => "findings",
            ArtifactKind::Nodule => "nodules",
            ArtifactKind::Diagnosis => "diagnoses",
            ArtifactKind::Stage => "stages",
            ArtifactKind::TreatmentRecommendation => "treatment_recommendations",
        }
    }

    /// Kinds an analysis collaborator may return.
    pub fn is_analysis_result(&self) -> bool {
        !matches!(
            self,
            ArtifactKind::ImagingMetadata | ArtifactKind::ReportText
        )
    }

    /// Lenient parse of collaborator output ("nodules", "Treatment recommendation", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.trim_end_matches('s') {
            "finding" => Some(ArtifactKind::Finding),
            "nodule" => Some(ArtifactKind::Nodule),
            "diagnosi" | "diagnose" => Some(ArtifactKind::Diagnosis),
            "stage" | "staging" => Some(ArtifactKind::Stage),
            "treatment_recommendation" | "treatment" | "recommendation" => {
                Some(ArtifactKind::TreatmentRecommendation)
            }
            _ => None,
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Structured result returned by an analysis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: ArtifactKind,
    pub label: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Finding {
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "label": self.label,
            "detail": self.detail,
            "confidence": self.confidence,
        })
    }
}

/// Persisted derived result, owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Artifact {
    pub id: Uuid,
    pub session_id: Uuid,
    pub document_id: Option<Uuid>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub kind: Option<ArtifactKind>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`Artifact`].
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub session_id: Uuid,
    pub document_id: Option<Uuid>,
    pub kind: ArtifactKind,
    pub payload: serde_json::Value,
}

impl NewArtifact {
    pub fn from_finding(session_id: Uuid, document_id: Uuid, finding: &Finding) -> Self {
        Self {
            session_id,
            document_id: Some(document_id),
            kind: finding.kind,
            payload: finding.payload(),
        }
    }
}
