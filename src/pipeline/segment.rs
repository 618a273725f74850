//! Invoice segmentation: flat page sequence → `InvoiceGroup`s.
//!
//! A dealer export often concatenates many vehicle invoices into one PDF.
//! [`InvoiceSegmenter`] splits it back into per-vehicle groups in a single
//! left-to-right pass using two heuristics supplied by a
//! [`SegmentationRules`] implementation:
//!
//! - **Separator pages** (near-empty after cleaning) close the current group
//!   and are dropped.
//! - **Header pages** (matching the configured marker) start a new group and
//!   become its first page.
//!
//! The heuristics are best-effort text matching. Two invoices with no header
//! and no blank page between them land in one group; callers curate the
//! result through [`InvoiceGroup::selected`] rather than treating a
//! misgrouping as an error.

use crate::config::DescriberConfig;
use crate::error::DescriberError;
use crate::pipeline::source::PageText;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A contiguous run of pages judged to belong to one vehicle document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceGroup {
    /// `"<file name>#<ordinal>"`, ordinals starting at 1 per file.
    pub id: String,
    /// File the pages came from.
    pub source_file: String,
    /// Never empty; original page order.
    pub pages: Vec<PageText>,
    /// `raw_text` of every page joined with `"\n"`.
    pub concatenated_text: String,
    /// Whether the group is dispatched. Only changed by explicit curation.
    pub selected: bool,
}

impl InvoiceGroup {
    fn from_pages(source_file: &str, ordinal: usize, pages: Vec<PageText>) -> Self {
        let concatenated_text = pages
            .iter()
            .map(|p| p.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            id: format!("{source_file}#{ordinal}"),
            source_file: source_file.to_string(),
            pages,
            concatenated_text,
            selected: true,
        }
    }

    /// Page numbers in this group, in order.
    pub fn page_numbers(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.page_number).collect()
    }

    /// Include or exclude the group from the next run.
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Flip [`Self::selected`] and return the new value.
    pub fn toggle(&mut self) -> bool {
        self.selected = !self.selected;
        self.selected
    }
}

/// Page classification predicates used by [`InvoiceSegmenter`].
///
/// Both receive the **cleaned** page text (see [`clean_page_text`]).
pub trait SegmentationRules: Send + Sync {
    /// The page is a boundary marker and belongs to no group.
    fn is_separator(&self, cleaned: &str) -> bool;
    /// The page opens a new invoice.
    fn is_group_header(&self, cleaned: &str) -> bool;
}

/// Length threshold for separators, regex for headers.
#[derive(Debug, Clone)]
pub struct HeuristicRules {
    blank_threshold: usize,
    header: Regex,
}

static DEFAULT_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Vehicle Inquiry").unwrap());

impl Default for HeuristicRules {
    fn default() -> Self {
        Self {
            blank_threshold: 20,
            header: DEFAULT_HEADER.clone(),
        }
    }
}

impl HeuristicRules {
    pub fn new(blank_threshold: usize, header: Regex) -> Self {
        Self {
            blank_threshold,
            header,
        }
    }

    pub fn from_config(config: &DescriberConfig) -> Result<Self, DescriberError> {
        Ok(Self::new(config.blank_threshold, config.header_regex()?))
    }
}

impl SegmentationRules for HeuristicRules {
    fn is_separator(&self, cleaned: &str) -> bool {
        cleaned.chars().count() < self.blank_threshold
    }

    fn is_group_header(&self, cleaned: &str) -> bool {
        self.header.is_match(cleaned)
    }
}

static RE_PAGE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Page \d+:\s*").unwrap());

/// Strip a leading `"Page N:"` prefix and surrounding whitespace.
pub fn clean_page_text(raw: &str) -> &str {
    let start = RE_PAGE_PREFIX.find(raw).map(|m| m.end()).unwrap_or(0);
    raw[start..].trim()
}

/// Splits one file's pages into invoice groups.
#[derive(Clone)]
pub struct InvoiceSegmenter {
    rules: Arc<dyn SegmentationRules>,
}

impl Default for InvoiceSegmenter {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicRules::default()))
    }
}

impl InvoiceSegmenter {
    pub fn new(rules: Arc<dyn SegmentationRules>) -> Self {
        Self { rules }
    }

    /// Partition `pages` (ordered, from `file_name`) into groups.
    ///
    /// Zero non-separator pages yields zero groups.
    pub fn segment(&self, file_name: &str, pages: &[PageText]) -> Vec<InvoiceGroup> {
        let mut groups = Vec::new();
        let mut current: Vec<PageText> = Vec::new();

        let flush = |current: &mut Vec<PageText>, groups: &mut Vec<InvoiceGroup>| {
            if !current.is_empty() {
                let ordinal = groups.len() + 1;
                groups.push(InvoiceGroup::from_pages(
                    file_name,
                    ordinal,
                    std::mem::take(current),
                ));
            }
        };

        for page in pages {
            let cleaned = clean_page_text(&page.raw_text);
            if self.rules.is_separator(cleaned) {
                debug!("{}: page {} is a separator", file_name, page.page_number);
                flush(&mut current, &mut groups);
                continue;
            }
            if self.rules.is_group_header(cleaned) && !current.is_empty() {
                flush(&mut current, &mut groups);
            }
            current.push(page.clone());
        }
        flush(&mut current, &mut groups);

        debug!(
            "{}: {} pages → {} groups",
            file_name,
            pages.len(),
            groups.len()
        );
        groups
    }
}

impl std::fmt::Debug for InvoiceSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceSegmenter")
            .field("rules", &"<dyn SegmentationRules>")
            .finish()
    }
}
