//! SAF exporter
//!
//! Regenerates an item's manifest files (metadata XML, `contents`, `handle`)
//! inside its SAF folder. The folder is found from the registered bitstream
//! locators (`-R<path>`, relative to the archive root); items with only inline
//! bitstreams need a folder hint from the caller.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use saf_common::model::{ItemRecord, MetadataField, MetadataValue, IIIF_SCHEMA};
use saf_common::Ports;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::manifest::{
    metadata_file_name, write_contents, write_handle, write_metadata_xml, BitstreamDeclaration,
    BitstreamSource, IiifOptions,
};
use crate::models::ExportOptions;

pub struct Exporter<'a> {
    ports: Ports<'a>,
    archive_root: PathBuf,
    options: ExportOptions,
    folder_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl<'a> Exporter<'a> {
    pub fn new(ports: Ports<'a>, archive_root: impl Into<PathBuf>, options: ExportOptions) -> Self {
        Self {
            ports,
            archive_root: archive_root.into(),
            options,
            folder_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Write the item's manifests into its SAF folder; returns the folder
    pub fn export_item(&self, item_id: Uuid, folder_hint: Option<&Path>) -> IngestResult<PathBuf> {
        let item = self.ports.store.item(item_id)?.ok_or_else(|| {
            IngestError::Persistence(saf_common::Error::NotFound(format!("item {}", item_id)))
        })?;

        let folder = self.locate_folder(&item, folder_hint)?;
        if !folder.is_dir() {
            return Err(IngestError::Validation(format!(
                "SAF folder {} for item {} is not a directory",
                folder.display(),
                item_id
            )));
        }

        let lock = self.folder_lock(&folder);
        let _serialised = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _writable = WritableFolder::open(&folder)?;

        self.write_metadata(&item, &folder)?;
        let declarations = self.declarations(&item, &folder)?;
        write_contents(&folder, &declarations)?;
        if let Some(handle) = &item.handle {
            write_handle(&folder, handle)?;
        }

        info!(item = %item_id, "Exported SAF manifests to {}", folder.display());
        Ok(folder)
    }

    /// SAF folder of an item
    ///
    /// Registered bitstreams win; with several candidate folders the first in
    /// path order is used. Without registered bitstreams the hint is used.
    pub fn locate_folder(&self, item: &ItemRecord, folder_hint: Option<&Path>) -> IngestResult<PathBuf> {
        let candidates: BTreeSet<PathBuf> = item
            .bitstreams()
            .filter_map(|(_, bs)| bs.registered_path())
            .filter_map(|path| Path::new(path).parent().map(Path::to_path_buf))
            .map(|parent| self.archive_root.join(relative(&parent)))
            .collect();

        if candidates.len() > 1 {
            warn!(
                item = %item.id,
                "Registered bitstreams span {} folders, using the first",
                candidates.len()
            );
        }

        candidates
            .into_iter()
            .next()
            .or_else(|| folder_hint.map(Path::to_path_buf))
            .ok_or(IngestError::Unlocatable(item.id))
    }

    fn folder_lock(&self, folder: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .folder_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(folder.to_path_buf()).or_default().clone()
    }

    fn write_metadata(&self, item: &ItemRecord, folder: &Path) -> IngestResult<()> {
        let values = if self.options.migrate {
            migrated(&item.metadata, self.options.handle_uri_prefix.as_deref())
        } else {
            item.metadata.iter().collect()
        };

        let schemas: BTreeSet<&str> = values.iter().map(|v| v.schema.as_str()).collect();
        for schema in schemas {
            let in_schema: Vec<&MetadataValue> =
                values.iter().copied().filter(|v| v.schema == schema).collect();
            let path = folder.join(metadata_file_name(schema));
            fs::write(&path, write_metadata_xml(schema, &in_schema))?;
            debug!("Wrote {} ({} values)", path.display(), in_schema.len());
        }
        Ok(())
    }

    /// `contents` declarations for the item's non-internal bitstreams
    pub fn declarations(&self, item: &ItemRecord, folder: &Path) -> IngestResult<Vec<BitstreamDeclaration>> {
        let mut declarations = Vec::new();

        for (bundle, bitstream) in item.bitstreams().filter(|(_, bs)| !bs.internal) {
            let source = match bitstream.registered_path() {
                Some(path) => BitstreamSource::Registered {
                    store_number: bitstream.store_number,
                    path: path.to_string(),
                },
                None if self.options.copy_bitstreams => BitstreamSource::Inline {
                    path: self.copy_bitstream(bitstream.id, &bitstream.name, folder)?,
                },
                None => BitstreamSource::Inline {
                    path: bitstream.name.clone(),
                },
            };

            let iiif_value = |element: &str, qualifier: Option<&str>| {
                bitstream
                    .metadata_value(&MetadataField::new(IIIF_SCHEMA, element, qualifier))
                    .map(str::to_string)
            };

            declarations.push(BitstreamDeclaration {
                source,
                bundle: bundle.name.clone(),
                description: bitstream.description.clone().filter(|d| !d.is_empty()),
                primary: bundle.primary_bitstream == Some(bitstream.id),
                permission: None,
                iiif: IiifOptions {
                    label: iiif_value("label", None),
                    height: iiif_value("image", Some("height")),
                    width: iiif_value("image", Some("width")),
                    toc: iiif_value("toc", None),
                },
            });
        }
        Ok(declarations)
    }

    /// Copy stored bytes into the folder; returns the file name used
    ///
    /// An existing file with identical bytes is reused; otherwise clashing
    /// file names get a numeric `1_` prefix, then `2_` and so on. Missing
    /// subdirectories of the name are created.
    fn copy_bitstream(&self, bitstream: Uuid, name: &str, folder: &Path) -> IngestResult<String> {
        let bytes = self.ports.store.retrieve_bitstream(bitstream)?;

        let mut candidate = name.to_string();
        let mut attempt = 0;
        loop {
            let target = folder.join(&candidate);
            if !target.exists() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &bytes)?;
                return Ok(candidate);
            }
            if fs::read(&target)? == bytes {
                return Ok(candidate);
            }
            attempt += 1;
            candidate = match name.rsplit_once('/') {
                Some((dir, file)) => format!("{}/{}_{}", dir, attempt, file),
                None => format!("{}_{}", attempt, name),
            };
        }
    }
}

/// Strip root and prefix components so a registered path joins under the archive root
fn relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect()
}

/// Drop values the receiving repository regenerates on install
fn migrated<'v>(values: &'v [MetadataValue], handle_uri_prefix: Option<&str>) -> Vec<&'v MetadataValue> {
    let dc = |element: &str, qualifier: Option<&str>| MetadataField::new("dc", element, qualifier);
    let accessioned: Vec<&str> = values
        .iter()
        .filter(|v| v.matches(&dc("date", Some("accessioned"))))
        .map(|v| v.value.as_str())
        .collect();

    values
        .iter()
        .filter(|v| {
            if v.schema != "dc" {
                return true;
            }
            match (v.element.as_str(), v.qualifier.as_deref()) {
                ("date", Some("accessioned")) | ("date", Some("available")) => false,
                ("date", Some("issued")) => !accessioned.contains(&v.value.as_str()),
                ("description", Some("provenance")) => false,
                ("format", Some("extent")) | ("format", Some("mimetype")) => false,
                ("identifier", Some("uri")) => {
                    !handle_uri_prefix.is_some_and(|prefix| v.value.starts_with(prefix))
                }
                _ => true,
            }
        })
        .collect()
}

/// Owner-writable for the lifetime of the guard, read-only again on drop
struct WritableFolder {
    path: PathBuf,
}

impl WritableFolder {
    fn open(path: &Path) -> IngestResult<Self> {
        set_owner_writable(path, true)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for WritableFolder {
    fn drop(&mut self) {
        if let Err(e) = set_owner_writable(&self.path, false) {
            warn!("Failed to make {} read-only again: {}", self.path.display(), e);
        }
    }
}

fn set_owner_writable(path: &Path, writable: bool) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        permissions.set_mode(if writable { mode | 0o200 } else { mode & !0o222 });
    }
    #[cfg(not(unix))]
    {
        permissions.set_readonly(!writable);
    }
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(element: &str, qualifier: Option<&str>, text: &str) -> MetadataValue {
        MetadataValue::new(&MetadataField::new("dc", element, qualifier), text)
    }

    #[test]
    fn test_migrate_drops_regenerated_fields() {
        let values = vec![
            value("title", None, "Kept"),
            value("date", Some("accessioned"), "2020-01-01T00:00:00Z"),
            value("date", Some("available"), "2020-01-01T00:00:00Z"),
            value("date", Some("issued"), "2020-01-01T00:00:00Z"),
            value("date", Some("issued"), "1999"),
            value("description", Some("provenance"), "Submitted by ..."),
            value("format", Some("mimetype"), "application/pdf"),
            value("identifier", Some("uri"), "http://hdl.handle.net/123456789/5"),
            value("identifier", Some("uri"), "https://example.org/record/5"),
        ];

        let kept: Vec<&str> = migrated(&values, Some("http://hdl.handle.net/"))
            .iter()
            .map(|v| v.value.as_str())
            .collect();

        assert_eq!(kept, vec!["Kept", "1999", "https://example.org/record/5"]);
    }

    #[test]
    fn test_relative_strips_root() {
        assert_eq!(relative(Path::new("/batch/item_1")), PathBuf::from("batch/item_1"));
        assert_eq!(relative(Path::new("batch/./item_1")), PathBuf::from("batch/item_1"));
    }
}
