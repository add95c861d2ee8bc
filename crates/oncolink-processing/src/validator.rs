use oncolink_core::AppError;

use crate::sniff::{family_of_declared, DetectedType};

/// Upload validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: more than {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Mismatched content type: declared {declared}, observed {observed}")]
    MismatchedContentType { declared: String, observed: String },

    #[error("Unrecognized content: no known file signature")]
    UnknownContent,

    #[error("Invalid session identifier")]
    InvalidSessionId,

    #[error("Empty file")]
    EmptyFile,
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Upload validator
///
/// Holds the configured allow-list and size bound; type checks operate on sniffed types.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_upload_size: u64,
    allowed_content_types: Vec<String>,
}

impl UploadValidator {
    pub fn new(max_upload_size: u64, allowed_content_types: Vec<String>) -> Self {
        Self {
            max_upload_size,
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|ct| ct.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Validate a byte count seen so far
    pub fn validate_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.max_upload_size {
            return Err(ValidationError::FileTooLarge {
                max: self.max_upload_size,
            });
        }
        Ok(())
    }

    /// Identify the observed type and check the declared type belongs to the same family
    pub fn validate_declared_matches(
        &self,
        declared: &str,
        detected: Option<DetectedType>,
        prefix_len: usize,
    ) -> Result<DetectedType, ValidationError> {
        if prefix_len == 0 {
            return Err(ValidationError::EmptyFile);
        }
        let detected = detected.ok_or(ValidationError::UnknownContent)?;

        match family_of_declared(declared) {
            Some(family) if family == detected.family => Ok(detected),
            _ => Err(ValidationError::MismatchedContentType {
                declared: declared.to_string(),
                observed: detected.mime.to_string(),
            }),
        }
    }

    /// Validate the observed content type against the allow-list
    pub fn validate_content_type(&self, detected: &DetectedType) -> Result<(), ValidationError> {
        if !self
            .allowed_content_types
            .iter()
            .any(|ct| ct == detected.mime)
        {
            return Err(ValidationError::InvalidContentType {
                content_type: detected.mime.to_string(),
                allowed: self.allowed_content_types.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::sniff;

    fn test_validator() -> UploadValidator {
        UploadValidator::new(
            1024 * 1024,
            vec![
                "application/dicom".to_string(),
                "application/pdf".to_string(),
                "Image/JPEG".to_string(),
            ],
        )
    }

    #[test]
    fn test_validate_size() {
        let validator = test_validator();
        assert!(validator.validate_size(512 * 1024).is_ok());
        assert!(validator.validate_size(1024 * 1024).is_ok());
        assert!(matches!(
            validator.validate_size(1024 * 1024 + 1),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_declared_pdf_with_jpeg_bytes_is_rejected() {
        let validator = test_validator();
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0];
        let result = validator.validate_declared_matches("application/pdf", sniff(&jpeg), jpeg.len());
        assert!(matches!(
            result,
            Err(ValidationError::MismatchedContentType { .. })
        ));
        let app: AppError = result.unwrap_err().into();
        assert!(matches!(app, AppError::Validation(_)));
    }

    #[test]
    fn test_family_match_accepts_sibling_raster_types() {
        let validator = test_validator();
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let detected = validator
            .validate_declared_matches("image/jpeg", sniff(&png), png.len())
            .unwrap();
        assert_eq!(detected.mime, "image/png");
    }

    #[test]
    fn test_unknown_and_empty_content() {
        let validator = test_validator();
        assert!(matches!(
            validator.validate_declared_matches("application/pdf", sniff(b"hello"), 5),
            Err(ValidationError::UnknownContent)
        ));
        assert!(matches!(
            validator.validate_declared_matches("application/pdf", None, 0),
            Err(ValidationError::EmptyFile)
        ));
    }

    #[test]
    fn test_allow_list_uses_observed_type() {
        let validator = test_validator();
        let pdf = sniff(b"%PDF-1.4").unwrap();
        assert!(validator.validate_content_type(&pdf).is_ok());

        let tiff = sniff(b"II*\0").unwrap();
        assert!(matches!(
            validator.validate_content_type(&tiff),
            Err(ValidationError::InvalidContentType { .. })
        ));
    }
}
