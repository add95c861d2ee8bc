//! Error types module
//!
//! Every failure in oncolink is expressed as an [`AppError`]. The variants form a closed
//! taxonomy shared by the credential, ingestion, and erasure services; lower layers (storage,
//! repositories, the stream cipher) convert their own errors into it and upper layers wrap
//! without swallowing.
//!
//! Errors are plain data. Logging happens once, at the boundary that catches the error,
//! using the fields exposed through [`ErrorMetadata`].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

/// Boxed cause carried by [`AppError::DataAccess`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like collaborator outages
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// External collaborator that produced an [`AppError::ExternalService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ImagingAnalysis,
    TextExtraction,
    PathologyAnalysis,
    InformationExtraction,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ImagingAnalysis => "imaging_analysis",
            Capability::TextExtraction => "text_extraction",
            Capability::PathologyAnalysis => "pathology_analysis",
            Capability::InformationExtraction => "information_extraction",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP-equivalent status code
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "ALREADY_USED")
    fn error_code(&self) -> &'static str;

    /// Whether the caller may retry (with backoff)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Structural parse failure in {filename}: {reason}")]
    StructuralParse { filename: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access link has expired")]
    Expired,

    #[error("Access link has already been used")]
    AlreadyUsed,

    #[error("External service failure: {capability}")]
    ExternalService {
        capability: Capability,
        #[source]
        source: anyhow::Error,
    },

    #[error("Data access error: {context}")]
    DataAccess {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap a persistence or storage failure.
    pub fn data_access(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::DataAccess {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Wrap a collaborator failure, tagging it with the capability that failed.
    pub fn external(capability: Capability, source: impl Into<anyhow::Error>) -> Self {
        AppError::ExternalService {
            capability,
            source: source.into(),
        }
    }

    /// Re-tag any non-`DataAccess` error raised by a persistence port as `DataAccess`.
    ///
    /// `NotFound` is kept: absence is meaningful to callers.
    pub fn into_data_access(self, context: &str) -> Self {
        match self {
            err @ (AppError::DataAccess { .. } | AppError::NotFound(_)) => err,
            other => AppError::data_access(context.to_string(), other.to_string()),
        }
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Validation(_) => "Validation",
            AppError::StructuralParse { .. } => "StructuralParseFailure",
            AppError::NotFound(_) => "NotFound",
            AppError::Expired => "Expired",
            AppError::AlreadyUsed => "AlreadyUsed",
            AppError::ExternalService { .. } => "ExternalServiceFailure",
            AppError::DataAccess { .. } => "DataAccess",
            AppError::Integrity(_) => "IntegrityFailure",
            AppError::Cancelled(_) => "Cancelled",
            AppError::DeadlineExceeded(_) => "DeadlineExceeded",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Capability tag for collaborator failures.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            AppError::ExternalService { capability, .. } => Some(*capability),
            _ => None,
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            other => AppError::data_access("database", other),
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::data_access("I/O", err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Validation(_) => (
            400,
            "VALIDATION_FAILED",
            false,
            Some("Check the file type and request parameters"),
            false,
            LogLevel::Debug,
        ),
        AppError::StructuralParse { .. } => (
            422,
            "STRUCTURAL_PARSE_FAILURE",
            false,
            Some("Upload a well-formed file"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Expired => (
            410,
            "LINK_EXPIRED",
            false,
            Some("Request a new access link"),
            false,
            LogLevel::Debug,
        ),
        AppError::AlreadyUsed => (
            409,
            "LINK_ALREADY_USED",
            false,
            Some("Request a new access link"),
            false,
            LogLevel::Debug,
        ),
        AppError::ExternalService { .. } => (
            502,
            "EXTERNAL_SERVICE_FAILURE",
            true,
            Some("Retry with backoff"),
            true,
            LogLevel::Warn,
        ),
        AppError::DataAccess { .. } => (
            500,
            "DATA_ACCESS_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Integrity(_) => (
            500,
            "INTEGRITY_FAILURE",
            false,
            Some("Upload the document again"),
            true,
            LogLevel::Error,
        ),
        AppError::Cancelled(_) => (
            499,
            "CANCELLED",
            true,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::DeadlineExceeded(_) => (
            504,
            "DEADLINE_EXCEEDED",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            false,
            Some("Contact support if this error persists"),
            true,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(ref msg) => msg.clone(),
            AppError::StructuralParse { filename, reason } => {
                format!("{} could not be parsed: {}", filename, reason)
            }
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Expired => "This access link has expired".to_string(),
            AppError::AlreadyUsed => "This access link has already been used".to_string(),
            AppError::ExternalService { capability, .. } => {
                format!("The {} service is unavailable", capability)
            }
            AppError::DataAccess { .. } => "Failed to access storage".to_string(),
            AppError::Integrity(_) => "Stored document failed its integrity check".to_string(),
            AppError::Cancelled(_) => "Request cancelled".to_string(),
            AppError::DeadlineExceeded(_) => "Request timed out".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_metadata_data_access() {
        let err = AppError::data_access("saving document", io::Error::other("disk full"));
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATA_ACCESS_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access storage");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_expired_and_already_used_are_distinct() {
        assert_ne!(AppError::Expired.error_code(), AppError::AlreadyUsed.error_code());
        assert!(!AppError::Expired.is_recoverable());
        assert!(!AppError::AlreadyUsed.is_recoverable());
        assert!(AppError::Expired.client_message().contains("expired"));
        assert!(AppError::AlreadyUsed.client_message().contains("already been used"));
    }

    #[test]
    fn test_external_service_carries_capability_and_cause() {
        let err = AppError::external(
            Capability::PathologyAnalysis,
            anyhow::anyhow!("upstream returned 503"),
        );
        assert_eq!(err.capability(), Some(Capability::PathologyAnalysis));
        assert!(err.is_recoverable());
        assert_eq!(err.http_status_code(), 502);
        assert!(err.detailed_message().contains("upstream returned 503"));
        assert!(err.to_string().contains("pathology_analysis"));
    }

    #[test]
    fn test_structural_parse_mentions_filename() {
        let err = AppError::StructuralParse {
            filename: "scan.dcm".to_string(),
            reason: "missing DICM marker".to_string(),
        };
        assert!(err.to_string().contains("scan.dcm"));
        assert!(err.client_message().contains("scan.dcm"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_into_data_access_keeps_not_found() {
        let err = AppError::NotFound("document".to_string()).into_data_access("persisting");
        assert!(matches!(err, AppError::NotFound(_)));

        let err = AppError::Internal("boom".to_string()).into_data_access("persisting");
        assert!(matches!(err, AppError::DataAccess { .. }));
    }

    #[test]
    fn test_integrity_is_not_retryable() {
        let err = AppError::Integrity("authentication tag mismatch".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.error_type(), "IntegrityFailure");
    }
}
