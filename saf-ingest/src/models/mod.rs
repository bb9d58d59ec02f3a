//! Data models for saf-ingest

pub mod batch_session;
pub mod options;

pub use batch_session::{
    BatchProgress, BatchSession, BatchState, FolderOutcome, FolderState, SkipReason,
};
pub use options::{BatchOptions, ExportOptions};
