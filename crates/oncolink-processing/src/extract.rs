//! Text extraction bindings.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;

use crate::ports::{ExtractedText, TextExtractor};
use crate::sniff::{family_of_declared, ContentFamily};

/// Extracts embedded text from PDFs with `pdf-extract`.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor;

#[cfg(feature = "pdf")]
#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, data: Bytes, _content_type: &str) -> anyhow::Result<ExtractedText> {
        // Parsing is CPU bound and pdf-extract may panic on malformed input.
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
            .await
            .context("PDF text extraction task failed")?
            .context("Failed to extract text from PDF")?;

        let text = text.trim().to_string();
        tracing::debug!(text_len = text.len(), "PDF text extracted");

        Ok(ExtractedText {
            text,
            confidence: Some(1.0),
        })
    }
}

/// Dispatches by content family: PDFs to the PDF extractor, raster images to an optional
/// OCR-capable extractor.
#[derive(Clone)]
pub struct RoutingTextExtractor {
    pdf: Arc<dyn TextExtractor>,
    image: Option<Arc<dyn TextExtractor>>,
}

impl RoutingTextExtractor {
    pub fn new(pdf: Arc<dyn TextExtractor>, image: Option<Arc<dyn TextExtractor>>) -> Self {
        Self { pdf, image }
    }
}

#[async_trait]
impl TextExtractor for RoutingTextExtractor {
    async fn extract_text(&self, data: Bytes, content_type: &str) -> anyhow::Result<ExtractedText> {
        match family_of_declared(content_type) {
            Some(ContentFamily::Pdf) => self.pdf.extract_text(data, content_type).await,
            Some(ContentFamily::RasterImage) => match &self.image {
                Some(image) => image.extract_text(data, content_type).await,
                None => Err(anyhow::anyhow!(
                    "No image text extractor configured for {}",
                    content_type
                )),
            },
            _ => Err(anyhow::anyhow!(
                "Text extraction not supported for {}",
                content_type
            )),
        }
    }
}
