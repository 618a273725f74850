//! Input loading: read and validate uploaded PDF files.
//!
//! Every check here is cheap and runs before extraction, so a wrong file
//! type or an oversize upload is reported as a validation error naming the
//! file instead of surfacing later as an opaque parser failure.

use crate::error::DescriberError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An uploaded file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Display name; becomes the prefix of every group id from this file
    /// (repeats within a batch get a ` (n)` suffix).
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Check the `%PDF` magic bytes and the size limit of an in-memory upload.
pub fn validate_bytes(path: &Path, bytes: &[u8], max_bytes: u64) -> Result<(), DescriberError> {
    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(DescriberError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            limit: max_bytes,
        });
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(DescriberError::NotAPdf {
            path: path.to_path_buf(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Read a local file, validating existence, permissions, size and type.
pub async fn load_document(path: &Path, max_bytes: u64) -> Result<SourceDocument, DescriberError> {
    let path_buf = path.to_path_buf();

    let meta = tokio::fs::metadata(path).await.map_err(|e| io_error(path_buf.clone(), e))?;
    if !meta.is_file() {
        return Err(DescriberError::FileUnreadable {
            path: path_buf,
            detail: "not a regular file".into(),
        });
    }
    if meta.len() > max_bytes {
        return Err(DescriberError::FileTooLarge {
            path: path_buf,
            size: meta.len(),
            limit: max_bytes,
        });
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| io_error(path_buf.clone(), e))?;
    validate_bytes(path, &bytes, max_bytes)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    debug!("Loaded {} ({} bytes)", name, bytes.len());
    Ok(SourceDocument::new(name, bytes))
}

fn io_error(path: PathBuf, e: std::io::Error) -> DescriberError {
    match e.kind() {
        std::io::ErrorKind::NotFound => DescriberError::FileNotFound { path },
        std::io::ErrorKind::PermissionDenied => DescriberError::PermissionDenied { path },
        _ => DescriberError::FileUnreadable {
            path,
            detail: e.to_string(),
        },
    }
}
