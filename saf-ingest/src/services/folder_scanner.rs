//! Source folder validation and item folder discovery
//!
//! A batch source must sit exactly two or three levels below the archive root:
//! - `<root>/<set>/<batch>`: collection mode, every subfolder is an item
//! - `<root>/<set>/<batch>/<item>`: single-item mode

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IngestError, IngestResult};
use crate::manifest::{has_item_files, is_map_token};

const COLLECTION_MODE_DEPTH: usize = 2;
const SINGLE_ITEM_DEPTH: usize = 3;

/// Where the item folders of a batch live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    /// Every immediate subfolder of `dir` is an item
    Collection { dir: PathBuf },
    /// `parent/folder` is the only item
    SingleItem { parent: PathBuf, folder: String },
}

impl SourceLayout {
    /// Directory item folder names are relative to
    pub fn base_dir(&self) -> &Path {
        match self {
            SourceLayout::Collection { dir } => dir,
            SourceLayout::SingleItem { parent, .. } => parent,
        }
    }
}

pub struct FolderScanner {
    archive_root: PathBuf,
}

impl FolderScanner {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
        }
    }

    /// Validate `source_dir` against the archive root and classify it
    pub fn layout(&self, source_dir: &Path) -> IngestResult<SourceLayout> {
        let root = self.archive_root.canonicalize().map_err(|e| {
            IngestError::Validation(format!(
                "archive root {} is not accessible: {}",
                self.archive_root.display(),
                e
            ))
        })?;
        let source = source_dir.canonicalize().map_err(|e| {
            IngestError::Validation(format!(
                "source {} is not accessible: {}",
                source_dir.display(),
                e
            ))
        })?;

        if !source.is_dir() {
            return Err(IngestError::Validation(format!(
                "source {} is not a directory",
                source.display()
            )));
        }

        let relative = source.strip_prefix(&root).map_err(|_| {
            IngestError::Validation(format!(
                "source {} is outside archive root {}",
                source.display(),
                root.display()
            ))
        })?;

        match relative.components().count() {
            COLLECTION_MODE_DEPTH => Ok(SourceLayout::Collection { dir: source }),
            SINGLE_ITEM_DEPTH => {
                if !has_item_files(&source) {
                    return Err(IngestError::Validation(format!(
                        "{} needs dublin_core.xml and contents for a single-item import",
                        source.display()
                    )));
                }
                let folder = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| IngestError::Validation("source has no folder name".into()))?;
                let parent = source
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| IngestError::Validation("source has no parent".into()))?;
                Ok(SourceLayout::SingleItem { parent, folder })
            }
            depth => Err(IngestError::Validation(format!(
                "source {} is {} levels below the archive root; expected {} (collection) or {} (single item)",
                source.display(),
                depth,
                COLLECTION_MODE_DEPTH,
                SINGLE_ITEM_DEPTH
            ))),
        }
    }

    /// Item folder names of a layout, in plain string order
    ///
    /// Names must be a single MapFile token, so whitespace is rejected.
    pub fn item_folders(&self, layout: &SourceLayout) -> IngestResult<Vec<String>> {
        let folders = self.list_folders(layout)?;
        if let Some(bad) = folders.iter().find(|f| !is_map_token(f)) {
            return Err(IngestError::Validation(format!(
                "item folder name {:?} contains whitespace",
                bad
            )));
        }
        Ok(folders)
    }

    fn list_folders(&self, layout: &SourceLayout) -> IngestResult<Vec<String>> {
        match layout {
            SourceLayout::SingleItem { folder, .. } => Ok(vec![folder.clone()]),
            SourceLayout::Collection { dir } => {
                let mut folders = Vec::new();
                for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
                    let entry = entry.map_err(std::io::Error::from)?;
                    if entry.file_type().is_dir() {
                        folders.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                folders.sort();
                Ok(folders)
            }
        }
    }
}
