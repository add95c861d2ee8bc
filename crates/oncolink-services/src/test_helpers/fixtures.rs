//! Sample uploads and a fully wired service harness.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use oncolink_core::models::{ArtifactKind, Finding};
use oncolink_core::{ByteReader, SecureStream};
use oncolink_processing::{AnonymizationPolicy, Anonymizer, UploadValidator};

use super::collaborators::{finding, ScriptedAnalysis, ScriptedExtractor};
use super::memory_store::MemoryStore;
use super::mock_storage::MockStorage;
use crate::credentials::CredentialManager;
use crate::erasure::SessionEraser;
use crate::ingestion::{IngestionDeps, IngestionPipeline};

pub const TEST_KEY: [u8; 32] = [0x42; 32];

pub const PATHOLOGY_REPORT: &str = "SURGICAL PATHOLOGY REPORT\n\
    Patient: Maria Lopez\nMRN: 00981234\n\
    Specimen: core biopsy, right breast. Microscopic: invasive ductal carcinoma, grade 2.\n\
    Margins negative.";

pub const RADIOLOGY_REPORT: &str = "CT scan of the chest with contrast.\n\
    Impression: 9 mm nodule in the right upper lobe.";

pub fn reader(data: Vec<u8>) -> ByteReader {
    Box::pin(Cursor::new(data))
}

pub fn secure_stream() -> SecureStream {
    SecureStream::from_key_bytes(&TEST_KEY).unwrap()
}

pub fn pdf_bytes() -> Vec<u8> {
    let mut data = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj << /Type /Catalog >> endobj\n".to_vec();
    data.extend_from_slice(&[b' '; 256]);
    data.extend_from_slice(b"\n%%EOF\n");
    data
}

pub fn jpeg_bytes() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    data.extend_from_slice(&[0u8; 200]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn explicit_element(group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
    let mut value = value.to_vec();
    if value.len() % 2 == 1 {
        value.push(if vr == b"UI" { 0 } else { b' ' });
    }
    let mut out = Vec::new();
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(vr);
    if matches!(vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(&value);
    out
}

/// Explicit VR little endian CT study carrying direct identifiers and a small pixel payload.
pub fn dicom_bytes() -> Vec<u8> {
    let mut data = vec![0u8; 128];
    data.extend_from_slice(b"DICM");
    data.extend(explicit_element(0x0002, 0x0003, b"UI", b"1.2.826.0.1.3680043.2.1"));
    data.extend(explicit_element(0x0002, 0x0010, b"UI", b"1.2.840.10008.1.2.1"));
    data.extend(explicit_element(0x0008, 0x0018, b"UI", b"1.2.826.0.1.3680043.2.1"));
    data.extend(explicit_element(0x0008, 0x0060, b"CS", b"CT"));
    data.extend(explicit_element(0x0008, 0x0080, b"LO", b"Saint Example Hospital"));
    data.extend(explicit_element(0x0010, 0x0010, b"PN", b"Lopez^Maria"));
    data.extend(explicit_element(0x0010, 0x0020, b"LO", b"MRN00981234"));
    data.extend(explicit_element(0x0010, 0x0030, b"DA", b"19620314"));
    data.extend(explicit_element(0x0020, 0x000D, b"UI", b"1.2.826.0.1.3680043.2.2"));
    data.extend(explicit_element(0x0020, 0x000E, b"UI", b"1.2.826.0.1.3680043.2.3"));
    data.extend(explicit_element(0x7FE0, 0x0010, b"OW", &[0x55; 1024]));
    data
}

pub fn default_findings() -> Vec<Finding> {
    vec![
        finding(ArtifactKind::Nodule, "9 mm solid nodule, right upper lobe"),
        finding(ArtifactKind::Diagnosis, "Suspicious for primary lung malignancy"),
    ]
}

/// Services wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MockStorage>,
    pub analysis: Arc<ScriptedAnalysis>,
    pub extractor: Arc<ScriptedExtractor>,
    pub credentials: CredentialManager,
    pub pipeline: IngestionPipeline,
    pub eraser: SessionEraser,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(1024 * 1024, Duration::from_secs(5))
    }

    pub fn with_limits(max_upload_size: u64, analysis_timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MockStorage::new());
        let analysis = Arc::new(ScriptedAnalysis::returning(default_findings()));
        let extractor = Arc::new(ScriptedExtractor::returning(PATHOLOGY_REPORT));

        let credentials = CredentialManager::new(store.clone(), chrono::Duration::hours(1));
        let pipeline = IngestionPipeline::new(IngestionDeps {
            storage: storage.clone(),
            secure_stream: secure_stream(),
            documents: store.clone(),
            artifacts: store.clone(),
            text_extractor: extractor.clone(),
            analysis: analysis.clone(),
            validator: UploadValidator::new(
                max_upload_size,
                vec![
                    "application/dicom".to_string(),
                    "application/pdf".to_string(),
                    "image/jpeg".to_string(),
                    "image/png".to_string(),
                ],
            ),
            anonymizer: Anonymizer::new(&AnonymizationPolicy::default()).unwrap(),
            analysis_timeout,
        });
        let eraser = SessionEraser::new(store.clone(), storage.clone());

        Self {
            store,
            storage,
            analysis,
            extractor,
            credentials,
            pipeline,
            eraser,
        }
    }
}
