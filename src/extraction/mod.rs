// Text extraction module
// Turns uploaded PDF documents into ordered page text


use std::path::Path;

use async_trait::async_trait;
use lopdf::Document;
use tracing::{debug, warn};

use crate::{KbError, Result};

/// Plain text of a single page, in reading order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Result of extracting a whole document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Pages that produced text, in page order
    pub pages: Vec<PageText>,
    /// Total number of pages in the document, including empty ones
    pub page_count: u32,
}

impl ExtractedDocument {
    #[inline]
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

/// Produces page text from a stored document
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from the document at `path`
    ///
    /// Fails with [`KbError::Extraction`] when the document is unreadable,
    /// encrypted, or has no text layer.
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument>;
}

/// PDF text extractor backed by `lopdf`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[async_trait]
impl TextExtractor for PdfExtractor {
    #[inline]
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            KbError::Extraction(format!("Failed to read document {}: {}", path.display(), e))
        })?;

        debug!("Extracting text from {} ({} bytes)", path.display(), bytes.len());

        // lopdf parsing is CPU bound, keep it off the async executor
        tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| KbError::Extraction(format!("PDF extraction task failed: {}", e)))?
    }
}

fn page_count(pages: usize) -> Result<u32> {
    u32::try_from(pages)
        .map_err(|_| KbError::Extraction(format!("PDF has too many pages ({})", pages)))
}

/// Parse PDF bytes and collect normalized text per page
#[inline]
pub fn extract_pdf_text(bytes: &[u8]) -> Result<ExtractedDocument> {
    let document = Document::load_mem(bytes)
        .map_err(|e| KbError::Extraction(format!("File is not a readable PDF: {}", e)))?;

    if document.is_encrypted() {
        return Err(KbError::Extraction(
            "PDF is encrypted and cannot be read".to_string(),
        ));
    }

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(KbError::Extraction("PDF contains no pages".to_string()));
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in &page_numbers {
        match document.extract_text(&[*page_number]) {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if text.is_empty() {
                    debug!("Page {} has no text layer", page_number);
                } else {
                    pages.push(PageText {
                        page_number: *page_number,
                        text,
                    });
                }
            }
            Err(e) => {
                warn!("Could not extract text from page {}: {}", page_number, e);
            }
        }
    }

    if pages.is_empty() {
        return Err(KbError::Extraction(
            "No text could be extracted from the PDF (it may contain only scanned images)"
                .to_string(),
        ));
    }

    let extracted = ExtractedDocument {
        pages,
        page_count: page_count(page_numbers.len())?,
    };

    debug!(
        "Extracted {} chars from {}/{} pages",
        extracted.total_chars(),
        extracted.pages.len(),
        extracted.page_count
    );

    Ok(extracted)
}

/// Clean extracted text: replace glyphs that embed poorly, collapse
/// intra-line whitespace and keep blank lines as paragraph breaks
#[inline]
pub fn normalize_text(raw: &str) -> String {
    let cleaned = raw
        .replace('\0', "")
        .replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in cleaned.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs.join("\n\n")
}
