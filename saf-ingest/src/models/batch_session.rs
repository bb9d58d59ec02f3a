//! Batch session state machine
//!
//! A batch progresses through:
//! VALIDATING → IMPORTING → LINKING → SYNCING → COMPLETED
//! and any step may end in FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchState {
    /// Source path, depth and MapFile checks
    Validating,
    /// Building items folder by folder
    Importing,
    /// Resolving relationships across the batch
    Linking,
    /// Writing manifests back into source folders
    Syncing,
    /// Batch finished successfully
    Completed,
    /// Batch aborted with an error
    Failed,
}

/// Why a folder was not imported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already recorded in the MapFile of a resumed batch
    AlreadyImported,
    /// Neither the caller nor a `collections` file named a collection
    NoCollection,
    /// MapFile entry whose item no longer exists
    NotFound,
}

/// Per-folder state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FolderState {
    Pending,
    Skipped { reason: SkipReason },
    /// `identifier` is the handle, or the internal id for workflow items.
    /// Test-mode folders are validated but carry no identifier.
    Imported { identifier: Option<String> },
    /// Withdrawn from all collections by a delete batch
    Deleted { identifier: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderOutcome {
    pub folder: String,
    pub item_id: Option<Uuid>,
    pub state: FolderState,
}

/// Progress tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Folders processed so far
    pub current: usize,

    /// Folders in the batch
    pub total: usize,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,

    /// Current operation description
    pub current_operation: String,
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self {
            current: 0,
            total: 0,
            percentage: 0.0,
            current_operation: String::from("Initializing..."),
        }
    }
}

/// One import/replace/delete invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSession {
    /// Unique session identifier
    pub session_id: Uuid,

    pub state: BatchState,

    /// Source directory of the batch
    pub source: String,

    pub folders: Vec<FolderOutcome>,

    pub relationships_created: usize,

    pub progress: BatchProgress,

    pub started_at: DateTime<Utc>,

    /// Set on COMPLETED or FAILED
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchSession {
    pub fn new(source: String) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: BatchState::Validating,
            source,
            folders: Vec::new(),
            relationships_created: 0,
            progress: BatchProgress::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: BatchState) {
        tracing::debug!(
            session_id = %self.session_id,
            from = ?self.state,
            to = ?new_state,
            "Batch state transition"
        );
        self.state = new_state;

        if self.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn update_progress(&mut self, current: usize, total: usize, operation: String) {
        self.progress.current = current;
        self.progress.total = total;
        self.progress.percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        self.progress.current_operation = operation;
    }

    pub fn record(&mut self, folder: &str, item_id: Option<Uuid>, state: FolderState) {
        self.folders.push(FolderOutcome {
            folder: folder.to_string(),
            item_id,
            state,
        });
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, BatchState::Completed | BatchState::Failed)
    }

    pub fn imported(&self) -> impl Iterator<Item = &FolderOutcome> {
        self.folders
            .iter()
            .filter(|f| matches!(f.state, FolderState::Imported { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FolderOutcome> {
        self.folders
            .iter()
            .filter(|f| matches!(f.state, FolderState::Skipped { .. }))
    }

    pub fn outcome(&self, folder: &str) -> Option<&FolderOutcome> {
        self.folders.iter().find(|f| f.folder == folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transition_sets_end_time() {
        let mut session = BatchSession::new("/archive/batch".into());
        session.transition_to(BatchState::Importing);
        assert!(session.ended_at.is_none());

        session.transition_to(BatchState::Completed);
        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_progress_percentage() {
        let mut session = BatchSession::new("/archive/batch".into());
        session.update_progress(1, 4, "item_1".into());
        assert_eq!(session.progress.percentage, 25.0);

        session.update_progress(0, 0, "empty".into());
        assert_eq!(session.progress.percentage, 0.0);
    }

    #[test]
    fn test_folder_outcomes() {
        let mut session = BatchSession::new("/archive/batch".into());
        session.record("a", None, FolderState::Skipped { reason: SkipReason::AlreadyImported });
        session.record(
            "b",
            Some(Uuid::new_v4()),
            FolderState::Imported { identifier: Some("123456789/2".into()) },
        );

        assert_eq!(session.imported().count(), 1);
        assert_eq!(session.skipped().count(), 1);
        assert!(session.outcome("b").is_some());
    }
}
