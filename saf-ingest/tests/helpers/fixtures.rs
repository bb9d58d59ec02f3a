//! Fixture archives for batch tests
//!
//! Builds `<root>/set/batch/<item>` trees in a TempDir next to an in-memory
//! repository seeded with one collection.

use std::fs;
use std::path::{Path, PathBuf};

use saf_common::model::CollectionRecord;
use saf_common::{MemoryRepository, Ports};
use saf_ingest::models::BatchOptions;
use saf_ingest::services::BatchImporter;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Render a `dublin_core.xml`-style document
pub fn dublin_core_xml(schema: &str, values: &[(&str, Option<&str>, &str)]) -> String {
    let mut xml = format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<dublin_core schema=\"{}\">\n", schema);
    for (element, qualifier, value) in values {
        xml.push_str(&format!(
            "  <dcvalue element=\"{}\" qualifier=\"{}\">{}</dcvalue>\n",
            element,
            qualifier.unwrap_or("none"),
            value
        ));
    }
    xml.push_str("</dublin_core>\n");
    xml
}

pub struct ArchiveFixture {
    root: TempDir,
    pub repo: MemoryRepository,
    pub collection: CollectionRecord,
}

impl ArchiveFixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("set").join("batch")).unwrap();
        let repo = MemoryRepository::new();
        let collection = repo.create_collection("Test Collection");
        Self {
            root,
            repo,
            collection,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Collection-mode source directory
    pub fn batch_dir(&self) -> PathBuf {
        self.root.path().join("set").join("batch")
    }

    pub fn mapfile(&self) -> PathBuf {
        self.root.path().join("mapfile")
    }

    /// Create (or reopen) an item folder in the batch
    pub fn item(&self, folder: &str) -> ItemFolder {
        let dir = self.batch_dir().join(folder);
        fs::create_dir_all(&dir).unwrap();
        ItemFolder { dir }
    }

    /// An item folder with a title, one inline file and nothing else
    pub fn simple_item(&self, folder: &str, title: &str) -> ItemFolder {
        let item = self.item(folder);
        item.dublin_core(&[("title", None, title)])
            .file(&format!("{}.txt", folder), title.as_bytes())
            .contents(&[&format!("{}.txt", folder)]);
        item
    }

    pub fn ports(&self) -> Ports<'_> {
        Ports::from_repository(&self.repo)
    }

    pub fn importer(&self, options: BatchOptions) -> BatchImporter<'_> {
        BatchImporter::new(self.ports(), self.root.path(), options)
    }

    /// Import the whole batch into the fixture collection
    pub fn import(&self, options: BatchOptions) -> saf_ingest::IngestResult<saf_ingest::models::BatchSession> {
        let collections = [self.collection.id];
        self.importer(options)
            .import_batch(Some(&collections), &self.batch_dir(), &self.mapfile())
    }

    pub fn mapfile_lines(&self) -> Vec<String> {
        fs::read_to_string(self.mapfile())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Drop for ArchiveFixture {
    /// Exported folders are left read-only; make them removable again
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for entry in WalkDir::new(self.root.path()).into_iter().flatten() {
                if entry.file_type().is_dir() {
                    let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755));
                }
            }
        }
    }
}

/// Builder for one item folder's files
pub struct ItemFolder {
    pub dir: PathBuf,
}

impl ItemFolder {
    pub fn dublin_core(&self, values: &[(&str, Option<&str>, &str)]) -> &Self {
        fs::write(self.dir.join("dublin_core.xml"), dublin_core_xml("dc", values)).unwrap();
        self
    }

    /// `metadata_<schema>.xml`
    pub fn schema_metadata(&self, schema: &str, values: &[(&str, Option<&str>, &str)]) -> &Self {
        fs::write(
            self.dir.join(format!("metadata_{}.xml", schema)),
            dublin_core_xml(schema, values),
        )
        .unwrap();
        self
    }

    pub fn file(&self, name: &str, bytes: &[u8]) -> &Self {
        fs::write(self.dir.join(name), bytes).unwrap();
        self
    }

    pub fn contents(&self, lines: &[&str]) -> &Self {
        self.lines("contents", lines)
    }

    pub fn collections(&self, lines: &[&str]) -> &Self {
        self.lines("collections", lines)
    }

    pub fn relationships(&self, lines: &[&str]) -> &Self {
        self.lines("relationships", lines)
    }

    pub fn handle(&self, handle: &str) -> &Self {
        fs::write(self.dir.join("handle"), format!("{}\n", handle)).unwrap();
        self
    }

    fn lines(&self, name: &str, lines: &[&str]) -> &Self {
        let mut text = lines.join("\n");
        text.push('\n');
        fs::write(self.dir.join(name), text).unwrap();
        self
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.dir.join(name)).unwrap()
    }
}
