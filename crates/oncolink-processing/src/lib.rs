//! Oncolink Processing Library
//!
//! Building blocks for the ingestion pipeline: content sniffing, the upload allow-list,
//! DICOM structural parsing, anonymization, report classification, and the collaborator
//! ports consumed by the services.

pub mod anonymize;
pub mod classify;
pub mod dicom;
pub mod extract;
pub mod ports;
pub mod sniff;
pub mod validator;

pub use anonymize::{AnonymizationPolicy, Anonymizer, TagRule, TextPattern};
pub use classify::classify_report;
pub use dicom::{parse_dicom, DicomElement, DicomError, DicomHeader, Tag, DICOM_HEADER_READ_LIMIT};
#[cfg(feature = "pdf")]
pub use extract::PdfTextExtractor;
pub use extract::RoutingTextExtractor;
pub use ports::{AnalysisService, ExtractedText, ImagingInput, TextExtractor};
pub use sniff::{family_of_declared, sniff, ContentFamily, DetectedType, SNIFF_LEN};
pub use validator::{UploadValidator, ValidationError};
