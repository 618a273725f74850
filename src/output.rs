//! Output types for analysis runs.

use crate::catalog::{AuxiliaryParams, DocumentTypeKey};
use crate::error::{DescriberError, FileError};
use crate::pipeline::segment::InvoiceGroup;
use crate::prompts::NO_RESULT_SENTINEL;
use serde::{Deserialize, Serialize};

/// Lifecycle of one analysis run.
///
/// ```text
/// Idle ──▶ Segmenting ──▶ Dispatching ──▶ Completed
///                              │
///                              └──────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Segmenting,
    Dispatching,
    Completed,
    Failed,
}

impl RunState {
    /// Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Description generated for one invoice group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Position in the run's output; equals the dispatch position.
    pub index: usize,
    /// Cleaned description, or the sentinel text.
    pub text: String,
    /// Id of the group this describes.
    pub source_group_id: String,
    /// The endpoint succeeded but returned nothing usable.
    pub sentinel: bool,
}

impl GenerationResult {
    pub fn generated(index: usize, source_group_id: impl Into<String>, text: String) -> Self {
        Self {
            index,
            text,
            source_group_id: source_group_id.into(),
            sentinel: false,
        }
    }

    pub fn no_result(index: usize, source_group_id: impl Into<String>) -> Self {
        Self {
            index,
            text: NO_RESULT_SENTINEL.to_string(),
            source_group_id: source_group_id.into(),
            sentinel: true,
        }
    }
}

/// State, queue and results of one analysis run.
///
/// The queue is fixed when dispatch begins; `cursor` is the position of the
/// next group to dispatch and only moves forward. After a transport failure
/// the cursor points at the group that failed, so `pending()` lists exactly
/// the groups that have no result.
#[derive(Debug)]
pub struct AnalysisRun {
    pub(crate) state: RunState,
    pub(crate) type_key: DocumentTypeKey,
    pub(crate) aux: AuxiliaryParams,
    pub(crate) queue: Vec<InvoiceGroup>,
    pub(crate) cursor: usize,
    pub(crate) results: Vec<GenerationResult>,
    pub(crate) file_errors: Vec<FileError>,
    pub(crate) error: Option<DescriberError>,
    pub(crate) progress: u8,
}

impl AnalysisRun {
    pub(crate) fn new(type_key: DocumentTypeKey, aux: AuxiliaryParams) -> Self {
        Self {
            state: RunState::Idle,
            type_key,
            aux,
            queue: Vec::new(),
            cursor: 0,
            results: Vec::new(),
            file_errors: Vec::new(),
            error: None,
            progress: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Document type the run's requests were built with.
    pub fn type_key(&self) -> &DocumentTypeKey {
        &self.type_key
    }

    /// Auxiliary fields applied to every request of the run.
    pub fn aux(&self) -> &AuxiliaryParams {
        &self.aux
    }

    /// Groups in dispatch order.
    pub fn queue(&self) -> &[InvoiceGroup] {
        &self.queue
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Groups not yet dispatched successfully.
    pub fn pending(&self) -> &[InvoiceGroup] {
        &self.queue[self.cursor.min(self.queue.len())..]
    }

    /// Results in dispatch order; partial when the run failed.
    pub fn results(&self) -> &[GenerationResult] {
        &self.results
    }

    /// Files skipped during extraction.
    pub fn file_errors(&self) -> &[FileError] {
        &self.file_errors
    }

    /// The error that stopped the run, if it failed.
    pub fn error(&self) -> Option<&DescriberError> {
        self.error.as_ref()
    }

    /// Last reported progress, 0–100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Number of "no result" placeholders.
    pub fn sentinel_count(&self) -> usize {
        self.results.iter().filter(|r| r.sentinel).count()
    }

    /// Results of a completed run, or the error of a failed one.
    pub fn into_result(self) -> Result<Vec<GenerationResult>, DescriberError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }

    /// Split into results and the terminal error without discarding either.
    pub fn into_parts(self) -> (Vec<GenerationResult>, Option<DescriberError>) {
        (self.results, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_result_uses_placeholder_text() {
        let r = GenerationResult::no_result(2, "a.pdf#3");
        assert!(r.sentinel);
        assert_eq!(r.text, NO_RESULT_SENTINEL);
        assert_eq!(r.index, 2);
    }

    #[test]
    fn fresh_run_is_idle_and_empty() {
        let run = AnalysisRun::new(DocumentTypeKey::Used, AuxiliaryParams::default());
        assert_eq!(run.state(), RunState::Idle);
        assert!(!run.state().is_terminal());
        assert!(run.pending().is_empty());
        assert_eq!(run.type_key(), &DocumentTypeKey::Used);
        assert!(run.into_result().unwrap().is_empty());
    }

    #[test]
    fn failed_run_into_result_is_err() {
        let mut run = AnalysisRun::new(DocumentTypeKey::Mini, AuxiliaryParams::default());
        run.results
            .push(GenerationResult::generated(0, "a.pdf#1", "Copy".into()));
        run.error = Some(DescriberError::RemoteTransport {
            detail: "reset".into(),
        });
        run.state = RunState::Failed;
        let (results, error) = run.into_parts();
        assert_eq!(results.len(), 1);
        assert!(error.is_some());
    }
}
