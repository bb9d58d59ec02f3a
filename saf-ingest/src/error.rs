//! Error types for saf-ingest
//!
//! Fatal errors abort the current folder or batch step. Soft problems
//! (unknown group, missing option target, absent handle file) are logged
//! with `tracing::warn!` and never surface here.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for archive engine operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Archive engine error
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad source depth, path outside the archive root, missing item files.
    /// Raised before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed manifest file or missing declared content file
    #[error("Malformed manifest {path}: {reason}")]
    ManifestFormat { path: PathBuf, reason: String },

    /// Item folder has no `contents` file and holds files other than metadata
    #[error("No contents file in {0}")]
    MissingContents(PathBuf),

    /// Identifier, collection or relationship type could not be resolved
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Store failure (after cleanup of any partial container)
    #[error("Persistence error: {0}")]
    Persistence(#[from] saf_common::Error),

    /// Exporter could not determine the item's SAF folder
    #[error("Cannot locate SAF folder for item {0}")]
    Unlocatable(Uuid),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IngestError::ManifestFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
