//! Simple Archive Format manifest codec
//!
//! An item folder holds:
//! - `dublin_core.xml` and `metadata_<schema>.xml` metadata files
//! - `contents`, one line per bitstream
//! - optional `collections`, `relationships` and `handle` files

pub mod collections;
pub mod contents;
pub mod handle;
pub mod map_file;
pub mod metadata;
pub mod relationships;

pub use collections::{parse_collections, read_collection_identifiers};
pub use contents::{
    parse_contents, write_contents, BitstreamDeclaration, BitstreamSource, IiifOptions,
    PermissionOverride,
};
pub use handle::{parse_handle, write_handle};
pub use map_file::{is_map_token, MapEntry, MapFile, MapFileWriter};
pub use metadata::{metadata_file_name, parse_metadata, write_metadata_xml};
pub use relationships::{parse_relationships, RelationshipsDeclaration};

use crate::error::IngestResult;
use saf_common::model::MetadataValue;
use std::path::Path;

pub const DUBLIN_CORE_FILE: &str = "dublin_core.xml";
pub const CONTENTS_FILE: &str = "contents";
pub const COLLECTIONS_FILE: &str = "collections";
pub const RELATIONSHIPS_FILE: &str = "relationships";
pub const HANDLE_FILE: &str = "handle";

/// Files that may sit in an item folder without being declared in `contents`
pub fn is_recognized_manifest_file(name: &str) -> bool {
    matches!(
        name,
        DUBLIN_CORE_FILE | HANDLE_FILE | COLLECTIONS_FILE | RELATIONSHIPS_FILE
    ) || metadata::is_schema_file(name)
}

/// Whether a folder carries the files a single-item import needs
pub fn has_item_files(dir: &Path) -> bool {
    dir.join(DUBLIN_CORE_FILE).is_file() && dir.join(CONTENTS_FILE).is_file()
}

/// Everything an item folder declares, apart from its collections
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub folder: String,
    pub metadata: Vec<MetadataValue>,
    pub bitstreams: Vec<BitstreamDeclaration>,
    pub relationships: RelationshipsDeclaration,
    pub handle: Option<String>,
}

impl ManifestEntry {
    /// Parse and validate an item folder without touching any store
    pub fn read(folder: &str, item_dir: &Path) -> IngestResult<Self> {
        Ok(Self {
            folder: folder.to_string(),
            metadata: parse_metadata(item_dir)?,
            bitstreams: parse_contents(item_dir)?,
            relationships: parse_relationships(item_dir)?,
            handle: parse_handle(item_dir)?,
        })
    }
}
