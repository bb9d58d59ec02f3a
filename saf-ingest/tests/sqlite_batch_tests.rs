//! End-to-end batches against the SQLite-backed store

mod helpers;

use std::fs;
use std::path::Path;

use helpers::dublin_core_xml;
use saf_common::model::ObjectRef;
use saf_common::{IdentityResolver, Ports, RelationshipCatalog, Store};
use saf_ingest::db::SqliteStore;
use saf_ingest::manifest::{parse_handle, MapFile};
use saf_ingest::models::{BatchOptions, BatchState};
use saf_ingest::services::BatchImporter;
use tempfile::TempDir;
use uuid::Uuid;

struct SqliteArchive {
    root: TempDir,
    store: SqliteStore,
}

impl SqliteArchive {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let store = SqliteStore::open(
            &root.path().join("db").join("saf.db"),
            root.path().join("assetstore"),
            "123456789",
        )
        .unwrap();
        fs::create_dir_all(root.path().join("set").join("batch")).unwrap();
        Self { root, store }
    }

    fn folder(&self, name: &str, title: &str, entity: &str) -> std::path::PathBuf {
        let dir = self.batch().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("dublin_core.xml"),
            dublin_core_xml("dc", &[("title", None, title)]),
        )
        .unwrap();
        fs::write(
            dir.join("metadata_dspace.xml"),
            dublin_core_xml("dspace", &[("entity", Some("type"), entity)]),
        )
        .unwrap();
        fs::write(dir.join(format!("{}.txt", name)), title).unwrap();
        fs::write(dir.join("contents"), format!("{}.txt\n", name)).unwrap();
        dir
    }

    fn importer(&self, options: BatchOptions) -> BatchImporter<'_> {
        BatchImporter::new(Ports::from_repository(&self.store), self.root.path(), options)
    }

    fn mapfile(&self) -> std::path::PathBuf {
        self.root.path().join("mapfile")
    }

    /// Collection-mode source, two levels below the archive root
    fn batch(&self) -> std::path::PathBuf {
        self.root.path().join("set").join("batch")
    }

    fn item_for(&self, handle: &str) -> Option<Uuid> {
        match self.store.resolve_handle(handle).unwrap() {
            Some(ObjectRef::Item(id)) => Some(id),
            _ => None,
        }
    }
}

fn handle_of(map: &MapFile, folder: &str) -> String {
    map.get(folder).unwrap().to_string()
}

fn make_writable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
            if entry.file_type().is_dir() {
                let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755));
            }
        }
    }
}

#[test]
fn test_import_link_write_back_and_delete() {
    let archive = SqliteArchive::new();
    let collection = archive.store.create_collection("Theses").unwrap();
    archive
        .store
        .add_relationship_type(
            "Publication",
            "Person",
            "isAuthorOfPublication",
            "isPublicationOfAuthor",
        )
        .unwrap();

    let paper = archive.folder("paper", "A Thesis", "Publication");
    fs::write(
        paper.join("relationships"),
        "relation.isAuthorOfPublication folderName:person\n",
    )
    .unwrap();
    let person = archive.folder("person", "Doe, Jane", "Person");

    let collections = [collection.id];
    let session = archive
        .importer(BatchOptions {
            write_back: true,
            ..BatchOptions::default()
        })
        .import_batch(Some(&collections), &archive.batch(), &archive.mapfile())
        .unwrap();

    assert_eq!(session.state, BatchState::Completed);
    assert_eq!(session.relationships_created, 1);

    let map = MapFile::read(&archive.mapfile()).unwrap();
    assert_eq!(map.len(), 2);
    let paper_handle = handle_of(&map, "paper");
    assert!(paper_handle.starts_with("123456789/"));

    let paper_id = archive.item_for(&paper_handle).unwrap();
    let record = archive.store.item(paper_id).unwrap().unwrap();
    assert_eq!(record.collections, vec![collection.id]);
    assert_eq!(record.entity_type(), Some("Publication"));
    let (_, bitstream) = record.bitstreams().next().unwrap();
    assert_eq!(archive.store.retrieve_bitstream(bitstream.id).unwrap(), b"A Thesis");

    assert_eq!(archive.store.next_left_place(paper_id).unwrap(), 1);
    let person_id = archive.item_for(&handle_of(&map, "person")).unwrap();
    assert_eq!(archive.store.next_right_place(person_id).unwrap(), 1);

    assert_eq!(parse_handle(&paper).unwrap(), Some(paper_handle.clone()));
    assert_eq!(
        parse_handle(&person).unwrap(),
        Some(handle_of(&map, "person"))
    );

    let deleted = archive
        .importer(BatchOptions::default())
        .delete_batch(&archive.mapfile())
        .unwrap();

    assert_eq!(deleted.state, BatchState::Completed);
    assert!(archive.item_for(&paper_handle).is_none());
    assert!(archive.store.item(paper_id).unwrap().is_none());

    make_writable(archive.root.path());
}

#[test]
fn test_collections_file_resolves_by_handle() {
    let archive = SqliteArchive::new();
    let collection = archive.store.create_collection("Reports").unwrap();
    let handle = collection.handle.clone().unwrap();

    let dir = archive.folder("report", "Annual Report", "Publication");
    fs::write(dir.join("collections"), format!("{}\n", handle)).unwrap();

    archive
        .importer(BatchOptions::default())
        .import_batch(None, &archive.batch(), &archive.mapfile())
        .unwrap();

    let map = MapFile::read(&archive.mapfile()).unwrap();
    let item = archive.item_for(&handle_of(&map, "report")).unwrap();
    let record = archive.store.item(item).unwrap().unwrap();
    assert_eq!(record.owning_collection, Some(collection.id));
}
