//! Content sniffing from magic bytes.
//!
//! The observed type is derived from the first bytes of the upload only; the caller's
//! declared type is compared at the family level.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Number of prefix bytes inspected.
pub const SNIFF_LEN: usize = 512;

/// Offset of the `DICM` marker after the 128-byte preamble.
pub const DICM_OFFSET: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFamily {
    /// Medical imaging (DICOM Part 10).
    Imaging,
    /// PDF documents.
    Pdf,
    /// Common raster images (scanned reports, photos of letters).
    RasterImage,
}

impl Display for ContentFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContentFamily::Imaging => write!(f, "imaging"),
            ContentFamily::Pdf => write!(f, "pdf"),
            ContentFamily::RasterImage => write!(f, "raster image"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedType {
    pub mime: &'static str,
    pub family: ContentFamily,
}

impl DetectedType {
    const fn new(mime: &'static str, family: ContentFamily) -> Self {
        Self { mime, family }
    }
}

/// Detect the content type of `prefix`. Returns `None` when no known signature matches.
pub fn sniff(prefix: &[u8]) -> Option<DetectedType> {
    if prefix.len() >= DICM_OFFSET + 4 && &prefix[DICM_OFFSET..DICM_OFFSET + 4] == b"DICM" {
        return Some(DetectedType::new("application/dicom", ContentFamily::Imaging));
    }
    if prefix.starts_with(b"%PDF-") {
        return Some(DetectedType::new("application/pdf", ContentFamily::Pdf));
    }
    if prefix.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(DetectedType::new("image/jpeg", ContentFamily::RasterImage));
    }
    if prefix.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(DetectedType::new("image/png", ContentFamily::RasterImage));
    }
    if prefix.starts_with(b"II*\0") || prefix.starts_with(b"MM\0*") {
        return Some(DetectedType::new("image/tiff", ContentFamily::RasterImage));
    }
    if prefix.starts_with(b"GIF87a") || prefix.starts_with(b"GIF89a") {
        return Some(DetectedType::new("image/gif", ContentFamily::RasterImage));
    }
    if prefix.len() >= 12 && &prefix[0..4] == b"RIFF" && &prefix[8..12] == b"WEBP" {
        return Some(DetectedType::new("image/webp", ContentFamily::RasterImage));
    }
    None
}

/// Family implied by a caller-declared MIME type (parameters such as `; charset=` ignored).
pub fn family_of_declared(declared: &str) -> Option<ContentFamily> {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match essence.as_str() {
        "application/dicom" | "application/dicom+binary" => Some(ContentFamily::Imaging),
        "application/pdf" | "application/x-pdf" => Some(ContentFamily::Pdf),
        other if other.starts_with("image/") => Some(ContentFamily::RasterImage),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dicom_prefix() -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data.extend_from_slice(b"DICM");
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    #[test]
    fn detects_dicom_marker_at_offset() {
        let detected = sniff(&dicom_prefix()).unwrap();
        assert_eq!(detected.mime, "application/dicom");
        assert_eq!(detected.family, ContentFamily::Imaging);

        // Marker at the wrong offset is not DICOM.
        let mut shifted = vec![0u8; 64];
        shifted.extend_from_slice(b"DICM");
        assert!(sniff(&shifted).is_none());
    }

    #[test]
    fn detects_common_signatures() {
        assert_eq!(sniff(b"%PDF-1.7\n").unwrap().mime, "application/pdf");
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).unwrap().mime, "image/jpeg");
        assert_eq!(
            sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]).unwrap().mime,
            "image/png"
        );
        assert_eq!(sniff(b"II*\0\x08\0\0\0").unwrap().mime, "image/tiff");
        assert!(sniff(b"plain text").is_none());
        assert!(sniff(&[]).is_none());
    }

    #[test]
    fn declared_family_ignores_parameters_and_case() {
        assert_eq!(family_of_declared("Application/PDF"), Some(ContentFamily::Pdf));
        assert_eq!(
            family_of_declared("image/jpeg; quality=high"),
            Some(ContentFamily::RasterImage)
        );
        assert_eq!(family_of_declared("application/dicom"), Some(ContentFamily::Imaging));
        assert_eq!(family_of_declared("text/plain"), None);
    }
}
