//! Error types for the invoice-describer library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`DescriberError`] — the operation it was returned from did not happen
//!   (bad configuration, missing credential, transport failure mid-run,
//!   empty refinement instructions). Every variant belongs to one
//!   [`ErrorKind`] so callers can branch on the taxonomy without matching
//!   each variant.
//!
//! * [`FileError`] — **Non-fatal**: one uploaded file was rejected or could
//!   not be parsed, but the other files are fine. Stored inside the
//!   extraction report and [`crate::output::AnalysisRun`] instead of being
//!   propagated, so a single unreadable PDF never costs the operator the
//!   descriptions for every other vehicle.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of every [`DescriberError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A source file could not be parsed as a PDF or yielded no page text.
    Extraction,
    /// Invalid user input: wrong file type, oversize file, empty instructions.
    Validation,
    /// The generation endpoint failed or returned an unusable response.
    Remote,
    /// Missing credential or invalid configuration; nothing was dispatched.
    Configuration,
    /// Unexpected internal failure (task panic, runtime construction).
    Internal,
}

/// All errors returned by the invoice-describer library.
///
/// Per-file failures during a multi-file run use [`FileError`] and are
/// recorded rather than propagated here.
#[derive(Debug, Error)]
pub enum DescriberError {
    // ── Extraction errors ────────────────────────────────────────────────
    /// The buffer could not be parsed as a PDF document.
    #[error("Could not read '{file}' as a PDF: {detail}")]
    ExtractionFailed { file: String, detail: String },

    // ── Validation errors ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The path exists but could not be read as a file.
    #[error("Cannot read '{path}': {detail}")]
    FileUnreadable { path: PathBuf, detail: String },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// The file is larger than the configured upload limit.
    #[error("File '{path}' is {size} bytes, over the {limit}-byte limit")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Refinement was requested with blank instructions.
    #[error("Refinement instructions for result #{index} are empty")]
    EmptyInstructions { index: usize },

    /// A result index outside the current result set.
    #[error("No result #{index} (run produced {total} results)")]
    NoSuchResult { index: usize, total: usize },

    // ── Remote errors ────────────────────────────────────────────────────
    /// The endpoint answered with a non-success HTTP status.
    #[error("Generation endpoint returned HTTP {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// The request never completed (DNS, TLS, connection reset, timeout).
    #[error("Generation request failed: {detail}")]
    RemoteTransport { detail: String },

    /// HTTP success, but the body was not a chat-completion document.
    #[error("Generation endpoint returned a malformed body: {detail}")]
    MalformedResponse { detail: String },

    /// The provider library reported a failure.
    #[error("LLM provider error: {message}")]
    LlmApiError { message: String },

    /// A refinement call succeeded but produced no text.
    #[error("Refinement of result #{index} returned no content; the previous text was kept")]
    EmptyCompletion { index: usize },

    /// Transport failure that stopped a multi-group run.
    ///
    /// Results recorded before the failure stay on the run.
    #[error("Run stopped at group {position}/{total} ('{group_id}'), {completed} results kept: {source}")]
    RunAborted {
        group_id: String,
        position: usize,
        total: usize,
        completed: usize,
        #[source]
        source: Box<DescriberError>,
    },

    // ── Configuration errors ─────────────────────────────────────────────
    /// The API credential environment variable is absent or empty.
    #[error("Missing credential: set {var} before running.")]
    MissingCredential { var: String },

    /// The named LLM provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DescriberError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DescriberError::ExtractionFailed { .. } => ErrorKind::Extraction,
            DescriberError::FileNotFound { .. }
            | DescriberError::PermissionDenied { .. }
            | DescriberError::FileUnreadable { .. }
            | DescriberError::NotAPdf { .. }
            | DescriberError::FileTooLarge { .. }
            | DescriberError::EmptyInstructions { .. }
            | DescriberError::NoSuchResult { .. } => ErrorKind::Validation,
            DescriberError::RemoteStatus { .. }
            | DescriberError::RemoteTransport { .. }
            | DescriberError::MalformedResponse { .. }
            | DescriberError::LlmApiError { .. }
            | DescriberError::EmptyCompletion { .. }
            | DescriberError::RunAborted { .. } => ErrorKind::Remote,
            DescriberError::MissingCredential { .. }
            | DescriberError::ProviderNotConfigured { .. }
            | DescriberError::InvalidConfig(_) => ErrorKind::Configuration,
            DescriberError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A non-fatal error for a single uploaded file.
///
/// The file is skipped; every other file in the batch is still processed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{file}: {detail}")]
pub struct FileError {
    /// File name as given by the caller.
    pub file: String,
    /// Validation or Extraction.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub detail: String,
}

impl FileError {
    pub fn new(file: impl Into<String>, err: &DescriberError) -> Self {
        Self {
            file: file.into(),
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_aborted_display_names_group_and_kept_results() {
        let e = DescriberError::RunAborted {
            group_id: "march.pdf#2".into(),
            position: 2,
            total: 5,
            completed: 1,
            source: Box::new(DescriberError::RemoteStatus {
                status: 502,
                body: "bad gateway".into(),
            }),
        };
        let msg = e.to_string();
        assert!(msg.contains("2/5"), "got: {msg}");
        assert!(msg.contains("march.pdf#2"), "got: {msg}");
        assert!(msg.contains("1 results kept"), "got: {msg}");
        assert!(msg.contains("502"), "got: {msg}");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            DescriberError::EmptyInstructions { index: 0 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DescriberError::MissingCredential {
                var: "OPENAI_API_KEY".into()
            }
            .kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DescriberError::MalformedResponse {
                detail: "eof".into()
            }
            .kind(),
            ErrorKind::Remote
        );
        assert_eq!(
            DescriberError::ExtractionFailed {
                file: "a.pdf".into(),
                detail: "xref".into()
            }
            .kind(),
            ErrorKind::Extraction
        );
    }

    #[test]
    fn file_error_keeps_scope() {
        let err = DescriberError::FileTooLarge {
            path: PathBuf::from("big.pdf"),
            size: 30,
            limit: 10,
        };
        let fe = FileError::new("big.pdf", &err);
        assert_eq!(fe.kind, ErrorKind::Validation);
        assert!(fe.to_string().starts_with("big.pdf: "));
        assert!(fe.detail.contains("10-byte limit"));
    }

    #[test]
    fn missing_credential_names_variable() {
        let e = DescriberError::MissingCredential {
            var: "OPENAI_API_KEY".into(),
        };
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }
}
