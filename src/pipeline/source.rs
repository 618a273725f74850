//! Page text extraction: PDF bytes → ordered `PageText` sequence.
//!
//! Extraction is all-or-nothing per file. Either every page yields text and
//! the caller gets the full sequence, or the file fails with
//! [`DescriberError::ExtractionFailed`]; partial page lists are never
//! returned, because a group built from half a document would produce a
//! confidently wrong description.
//!
//! The [`PageTextSource`] trait is the seam for swapping extraction
//! libraries (or a stub in tests). [`PdfExtractSource`] is the default,
//! backed by the pure-Rust `pdf-extract` crate.

use crate::error::DescriberError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Text of one PDF page, created once during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Page text carrying its `"Page N:\n"` prefix.
    pub raw_text: String,
}

impl PageText {
    /// Build a page with the standard `"Page N:\n"` prefix.
    pub fn new(page_number: usize, text: &str) -> Self {
        Self {
            page_number,
            raw_text: format!("Page {page_number}:\n{text}"),
        }
    }
}

/// Produces the page texts of one PDF.
///
/// Implementations are called from a blocking thread, must be pure with
/// respect to `bytes`, and return pages ordered by page number from 1. Each
/// call starts from the beginning of the document.
pub trait PageTextSource: Send + Sync {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<PageText>, DescriberError>;
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to single spaces and trim.
///
/// Extraction libraries emit layout whitespace (column gaps, trailing
/// newlines) that carries no meaning for the prompt.
pub fn normalise_page_text(text: &str) -> String {
    RE_WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// [`PageTextSource`] backed by `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractSource;

impl PageTextSource for PdfExtractSource {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<PageText>, DescriberError> {
        // pdf-extract panics on some malformed font tables instead of erroring.
        let extracted = std::panic::catch_unwind(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        })
        .map_err(|_| DescriberError::ExtractionFailed {
            file: file_name.to_string(),
            detail: "PDF parser panicked on this document".to_string(),
        })?;

        let pages = extracted.map_err(|e| DescriberError::ExtractionFailed {
            file: file_name.to_string(),
            detail: e.to_string(),
        })?;

        if pages.is_empty() {
            return Err(DescriberError::ExtractionFailed {
                file: file_name.to_string(),
                detail: "document has no pages".to_string(),
            });
        }

        debug!("{}: extracted {} pages", file_name, pages.len());

        Ok(pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageText::new(i + 1, &normalise_page_text(text)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_text_carries_prefix() {
        let p = PageText::new(3, "Vehicle Inquiry ABC123");
        assert_eq!(p.page_number, 3);
        assert_eq!(p.raw_text, "Page 3:\nVehicle Inquiry ABC123");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(
            normalise_page_text("  Vehicle\n\nInquiry \t ABC123 \n"),
            "Vehicle Inquiry ABC123"
        );
        assert_eq!(normalise_page_text(" \n\t "), "");
    }

    #[test]
    fn garbage_bytes_fail_as_extraction_error() {
        let err = PdfExtractSource
            .extract("junk.pdf", b"%PDF-1.4 not really a pdf")
            .unwrap_err();
        assert!(matches!(err, DescriberError::ExtractionFailed { ref file, .. } if file == "junk.pdf"));
    }
}
