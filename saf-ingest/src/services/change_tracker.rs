//! Batch-scoped context: folder table and pending changes
//!
//! One `BatchContext` is created per import/replace/delete invocation and
//! consumed when it ends. It holds the folder → item table that relationship
//! identifiers resolve against, and accumulates change events so the items
//! touched by the batch can be written back to their SAF folders.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use saf_common::model::TEXT_BUNDLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    ModifyMetadata,
    Add,
    Remove,
    Delete,
}

/// Object an event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSubject {
    Item(Uuid),
    /// A bundle, identified by its owning item and name
    Bundle { item: Uuid, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub subject: ChangeSubject,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn item(item: Uuid, kind: ChangeKind) -> Self {
        Self {
            subject: ChangeSubject::Item(item),
            kind,
        }
    }

    pub fn bundle(item: Uuid, name: &str, kind: ChangeKind) -> Self {
        Self {
            subject: ChangeSubject::Bundle {
                item,
                name: name.to_string(),
            },
            kind,
        }
    }
}

/// An item folder known to the batch
#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub dir: PathBuf,
    /// `None` for folders validated in test mode
    pub item: Option<Uuid>,
}

/// Items to write back and items gone, drained at batch end
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub to_update: Vec<Uuid>,
    pub to_delete: Vec<Uuid>,
}

#[derive(Debug, Default)]
pub struct BatchContext {
    folders: BTreeMap<String, FolderRecord>,
    to_update: BTreeSet<Uuid>,
    to_delete: BTreeSet<Uuid>,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_folder(&mut self, folder: &str, dir: PathBuf, item: Option<Uuid>) {
        self.folders
            .insert(folder.to_string(), FolderRecord { dir, item });
    }

    pub fn item_for_folder(&self, folder: &str) -> Option<Uuid> {
        self.folders.get(folder).and_then(|r| r.item)
    }

    pub fn contains_folder(&self, folder: &str) -> bool {
        self.folders.contains_key(folder)
    }

    /// Source folder an item was built from in this batch
    pub fn folder_dir(&self, item: Uuid) -> Option<&Path> {
        self.folders
            .values()
            .find(|r| r.item == Some(item))
            .map(|r| r.dir.as_path())
    }

    /// Folders in sorted name order
    pub fn folders(&self) -> impl Iterator<Item = (&str, &FolderRecord)> {
        self.folders.iter().map(|(name, record)| (name.as_str(), record))
    }

    /// Fold one change event into the pending sets
    ///
    /// Adding or removing the TEXT bundle counts as a modification of its
    /// item; other bundle events carry nothing to write back.
    pub fn consume(&mut self, event: ChangeEvent) {
        let (item, kind) = match event.subject {
            ChangeSubject::Item(item) => (item, event.kind),
            ChangeSubject::Bundle { item, name } => {
                if name == TEXT_BUNDLE && matches!(event.kind, ChangeKind::Add | ChangeKind::Remove) {
                    (item, ChangeKind::Modify)
                } else {
                    return;
                }
            }
        };

        match kind {
            ChangeKind::Delete => {
                self.to_delete.insert(item);
            }
            _ => {
                self.to_update.insert(item);
            }
        }
    }

    /// Drain the pending sets; deleted items are never written back
    pub fn take_changes(&mut self) -> PendingChanges {
        let to_update = std::mem::take(&mut self.to_update);
        let to_delete = std::mem::take(&mut self.to_delete);
        PendingChanges {
            to_update: to_update.difference(&to_delete).copied().collect(),
            to_delete: to_delete.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_bundle_add_is_item_modify() {
        let item = Uuid::new_v4();
        let mut ctx = BatchContext::new();

        ctx.consume(ChangeEvent::bundle(item, TEXT_BUNDLE, ChangeKind::Add));

        assert_eq!(ctx.take_changes().to_update, vec![item]);
    }

    #[test]
    fn test_other_bundle_events_ignored() {
        let item = Uuid::new_v4();
        let mut ctx = BatchContext::new();

        ctx.consume(ChangeEvent::bundle(item, "ORIGINAL", ChangeKind::Add));
        ctx.consume(ChangeEvent::bundle(item, TEXT_BUNDLE, ChangeKind::ModifyMetadata));

        assert_eq!(ctx.take_changes(), PendingChanges::default());
    }

    #[test]
    fn test_deleted_items_not_updated() {
        let kept = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let mut ctx = BatchContext::new();

        ctx.consume(ChangeEvent::item(kept, ChangeKind::Create));
        ctx.consume(ChangeEvent::item(gone, ChangeKind::ModifyMetadata));
        ctx.consume(ChangeEvent::item(gone, ChangeKind::Delete));

        let changes = ctx.take_changes();
        assert_eq!(changes.to_update, vec![kept]);
        assert_eq!(changes.to_delete, vec![gone]);
        // Drained
        assert_eq!(ctx.take_changes(), PendingChanges::default());
    }

    #[test]
    fn test_folder_table() {
        let item = Uuid::new_v4();
        let mut ctx = BatchContext::new();
        ctx.register_folder("b", PathBuf::from("/archive/batch/b"), Some(item));
        ctx.register_folder("a", PathBuf::from("/archive/batch/a"), None);

        assert_eq!(ctx.item_for_folder("b"), Some(item));
        assert_eq!(ctx.item_for_folder("a"), None);
        assert!(ctx.contains_folder("a"));
        assert_eq!(ctx.folder_dir(item), Some(Path::new("/archive/batch/b")));
        let names: Vec<&str> = ctx.folders().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
