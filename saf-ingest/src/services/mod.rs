//! Archive engine services
//!
//! - `folder_scanner`: source validation and item folder discovery
//! - `item_builder`: one folder to one persisted item
//! - `relationship_resolver`: cross-item links after a batch is built
//! - `batch_importer`: import, replace and delete orchestration
//! - `exporter`: regenerate SAF manifests from a persisted item
//! - `change_tracker`: batch-scoped folder table and pending changes

/// Per-folder progress logging, demoted to debug in quiet mode
macro_rules! progress {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            tracing::debug!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}
pub(crate) use progress;

pub mod batch_importer;
pub mod change_tracker;
pub mod exporter;
pub mod folder_scanner;
pub mod item_builder;
pub mod relationship_resolver;

pub use batch_importer::BatchImporter;
pub use change_tracker::{BatchContext, ChangeEvent, ChangeKind, ChangeSubject, PendingChanges};
pub use exporter::Exporter;
pub use folder_scanner::{SourceLayout, FolderScanner};
pub use item_builder::{BuiltItem, ItemBuilder};
pub use relationship_resolver::{match_relationship_type, ItemReference, RelationshipResolver};
