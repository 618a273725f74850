//! Multi-file extraction and segmentation.
//!
//! Files share no state during extraction, so up to
//! `extraction_concurrency` of them are parsed at once on the blocking pool.
//! `buffered` (not `buffer_unordered`) keeps the output in upload order:
//! group order across files must match the order the operator supplied.
//! A file that fails is recorded as a [`FileError`] and skipped.
//!
//! Group ids are prefixed with the document name, so repeated names in one
//! batch are made distinct first (`invoices.pdf`, `invoices (2).pdf`).

use crate::error::{DescriberError, FileError};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::segment::{InvoiceGroup, InvoiceSegmenter};
use crate::pipeline::source::{PageText, PageTextSource};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Segmentation output for a batch of files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    /// Groups from every successfully extracted file, in upload order.
    pub groups: Vec<InvoiceGroup>,
    /// One entry per file that was skipped.
    pub file_errors: Vec<FileError>,
}

impl Extraction {
    /// Groups still marked `selected`, in order.
    pub fn selected(&self) -> Vec<InvoiceGroup> {
        self.groups.iter().filter(|g| g.selected).cloned().collect()
    }

    /// Mutable access by group id, for curation.
    pub fn group_mut(&mut self, id: &str) -> Option<&mut InvoiceGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }
}

/// Extract page texts from every document (concurrently) and segment them.
pub async fn extract_groups(
    source: &Arc<dyn PageTextSource>,
    segmenter: &InvoiceSegmenter,
    documents: &[SourceDocument],
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> Extraction {
    let names = unique_names(documents);
    let extracted: Vec<(String, Result<Vec<PageText>, DescriberError>)> =
        stream::iter(documents.iter().zip(names).map(|(doc, name)| {
            let source = Arc::clone(source);
            let bytes = doc.bytes.clone();
            async move {
                let task_name = name.clone();
                let result = tokio::task::spawn_blocking(move || source.extract(&task_name, &bytes))
                    .await
                    .unwrap_or_else(|e| {
                        Err(DescriberError::ExtractionFailed {
                            file: name.clone(),
                            detail: format!("extraction task failed: {e}"),
                        })
                    });
                (name, result)
            }
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut out = Extraction::default();
    for (name, result) in extracted {
        match result {
            Ok(pages) => {
                let groups = segmenter.segment(&name, &pages);
                if groups.is_empty() {
                    warn!("{}: no non-blank pages, no groups produced", name);
                }
                out.groups.extend(groups);
            }
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                if let Some(cb) = progress {
                    cb.on_file_error(&name, &e.to_string());
                }
                out.file_errors.push(FileError::new(name, &e));
            }
        }
    }

    info!(
        "Extracted {} files → {} groups ({} files skipped)",
        documents.len(),
        out.groups.len(),
        out.file_errors.len()
    );
    out
}

/// Document names in upload order, with later repeats renamed to
/// `stem (n).ext` so every name in the batch is distinct.
pub fn unique_names(documents: &[SourceDocument]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(documents.len());
    let mut names = Vec::with_capacity(documents.len());
    for doc in documents {
        let mut name = doc.name.clone();
        let mut n = 1;
        while taken.contains(&name) {
            n += 1;
            name = numbered(&doc.name, n);
        }
        if n > 1 {
            debug!("Duplicate document name '{}' renamed to '{}'", doc.name, name);
        }
        taken.insert(name.clone());
        names.push(name);
    }
    names
}

fn numbered(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Pages are the UTF-8 body split on `|`; a body of `FAIL` is unreadable.
    struct PipeSource;

    impl PageTextSource for PipeSource {
        fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<PageText>, DescriberError> {
            let body = String::from_utf8_lossy(bytes);
            if body == "FAIL" {
                return Err(DescriberError::ExtractionFailed {
                    file: file_name.to_string(),
                    detail: "bad xref".into(),
                });
            }
            Ok(body
                .split('|')
                .enumerate()
                .map(|(i, t)| PageText::new(i + 1, t))
                .collect())
        }
    }

    fn doc(name: &str, body: &str) -> SourceDocument {
        SourceDocument::new(name, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn groups_keep_upload_order_and_failures_are_skipped() {
        let source: Arc<dyn PageTextSource> = Arc::new(PipeSource);
        let docs = vec![
            doc("a.pdf", "Vehicle Inquiry A1 first car text|Vehicle Inquiry A2 second car"),
            doc("broken.pdf", "FAIL"),
            doc("b.pdf", "Vehicle Inquiry B1 only car in file"),
        ];

        let out = extract_groups(&source, &InvoiceSegmenter::default(), &docs, 3, None).await;

        let ids: Vec<&str> = out.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a.pdf#1", "a.pdf#2", "b.pdf#1"]);
        assert_eq!(out.file_errors.len(), 1);
        assert_eq!(out.file_errors[0].file, "broken.pdf");
        assert_eq!(out.file_errors[0].kind, ErrorKind::Extraction);
    }

    #[tokio::test]
    async fn curation_by_id() {
        let source: Arc<dyn PageTextSource> = Arc::new(PipeSource);
        let docs = vec![doc(
            "a.pdf",
            "Vehicle Inquiry A1 first car text|Vehicle Inquiry A2 second car",
        )];
        let mut out = extract_groups(&source, &InvoiceSegmenter::default(), &docs, 1, None).await;
        out.group_mut("a.pdf#1").unwrap().set_selected(false);
        let selected: Vec<String> = out.selected().into_iter().map(|g| g.id).collect();
        assert_eq!(selected, vec!["a.pdf#2".to_string()]);
        assert!(out.group_mut("a.pdf#9").is_none());
    }

    #[test]
    fn repeated_names_get_a_counter() {
        let docs = vec![
            doc("invoices.pdf", ""),
            doc("invoices.pdf", ""),
            doc("invoices (2).pdf", ""),
            doc("README", ""),
            doc("README", ""),
        ];
        assert_eq!(
            unique_names(&docs),
            vec![
                "invoices.pdf",
                "invoices (2).pdf",
                "invoices (2) (2).pdf",
                "README",
                "README (2)",
            ]
        );
    }

    #[tokio::test]
    async fn same_named_uploads_yield_distinct_ids() {
        let source: Arc<dyn PageTextSource> = Arc::new(PipeSource);
        let docs = vec![
            doc("invoices.pdf", "Vehicle Inquiry January car text"),
            doc("invoices.pdf", "Vehicle Inquiry February car text"),
        ];
        let mut out = extract_groups(&source, &InvoiceSegmenter::default(), &docs, 2, None).await;

        let ids: Vec<&str> = out.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["invoices.pdf#1", "invoices (2).pdf#1"]);

        out.group_mut("invoices (2).pdf#1").unwrap().set_selected(false);
        let selected = out.selected();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].concatenated_text.contains("January"));
    }
}
