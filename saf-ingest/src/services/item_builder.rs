//! Item builder
//!
//! Turns one parsed item folder into a persisted item:
//! 1. parse and validate the whole manifest (nothing is created on failure)
//! 2. create a workspace item in the first collection
//! 3. add metadata, realise bitstreams into bundles
//! 4. install (or start the workflow)
//! 5. apply per-bitstream options and extra collections
//!
//! A store failure in steps 3-4 discards the workspace item before the
//! error propagates; a failure in step 5 withdraws the installed item.

use std::path::Path;

use saf_common::model::{
    BitstreamRecord, ItemRecord, MetadataField, MetadataValue, IIIF_SCHEMA,
};
use saf_common::{Ports, Store};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::manifest::{BitstreamDeclaration, BitstreamSource, ManifestEntry};
use crate::models::BatchOptions;

use super::progress;

/// Result of building one folder
#[derive(Debug, Clone)]
pub struct BuiltItem {
    /// `None` in test mode
    pub item_id: Option<Uuid>,
    /// Handle, or internal id for workflow items; what the MapFile records
    pub identifier: Option<String>,
    pub entry: ManifestEntry,
}

pub struct ItemBuilder<'a> {
    ports: Ports<'a>,
    options: &'a BatchOptions,
}

impl<'a> ItemBuilder<'a> {
    pub fn new(ports: Ports<'a>, options: &'a BatchOptions) -> Self {
        Self { ports, options }
    }

    /// Build the item in `item_dir` into `collections`; the first one owns it
    pub fn build(
        &self,
        collections: &[Uuid],
        item_dir: &Path,
        folder: &str,
    ) -> IngestResult<BuiltItem> {
        let entry = ManifestEntry::read(folder, item_dir)?;

        if self.options.test {
            self.validate_metadata(&entry)?;
            for declaration in &entry.bitstreams {
                info!(folder, bundle = %declaration.bundle, "Would add bitstream {}", declaration.name());
            }
            return Ok(BuiltItem {
                item_id: None,
                identifier: None,
                entry,
            });
        }

        let Some((&owning, additional)) = collections.split_first() else {
            return Err(IngestError::Validation(format!(
                "no target collection for folder {}",
                folder
            )));
        };

        let item = self
            .ports
            .store
            .create_workspace_item(owning, self.options.template)?;
        debug!(folder, item = %item, "Created workspace item");

        let identifier = match self.populate_and_publish(item, &entry, item_dir) {
            Ok(identifier) => identifier,
            Err(e) => {
                if let Err(cleanup) = self.ports.store.discard_workspace_item(item) {
                    error!(
                        folder,
                        item = %item,
                        "Failed to discard workspace item after error ({}): {}",
                        e,
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = self.finish(item, &entry, additional) {
            if let Err(cleanup) = withdraw_item(self.ports.store, item) {
                error!(
                    folder,
                    item = %item,
                    "Failed to withdraw {} after error ({}): {}",
                    identifier,
                    e,
                    cleanup
                );
            }
            return Err(e);
        }

        progress!(self.options.quiet, folder, item = %item, "Imported as {}", identifier);

        Ok(BuiltItem {
            item_id: Some(item),
            identifier: Some(identifier),
            entry,
        })
    }

    fn populate_and_publish(
        &self,
        item: Uuid,
        entry: &ManifestEntry,
        item_dir: &Path,
    ) -> IngestResult<String> {
        let store = self.ports.store;

        for value in entry.metadata.iter().filter(|v| !v.value.is_empty()) {
            store.add_metadata(item, value)?;
        }

        for declaration in &entry.bitstreams {
            self.realise_bitstream(item, declaration, item_dir)?;
        }

        if self.options.use_workflow {
            store.start_workflow(item, self.options.workflow_notify)?;
            Ok(item.to_string())
        } else {
            Ok(store.install_item(item, entry.handle.as_deref())?)
        }
    }

    fn realise_bitstream(
        &self,
        item: Uuid,
        declaration: &BitstreamDeclaration,
        item_dir: &Path,
    ) -> IngestResult<Uuid> {
        let store = self.ports.store;

        let bundle = match store.find_bundle(item, &declaration.bundle)? {
            Some(bundle) => bundle,
            None => store.create_bundle(item, &declaration.bundle)?,
        };

        let bitstream = match &declaration.source {
            BitstreamSource::Inline { path } => {
                store.create_bitstream(bundle, path, &item_dir.join(path))?
            }
            BitstreamSource::Registered { store_number, path } => {
                let id = store.register_bitstream(bundle, *store_number, path, declaration.name())?;
                if let Some(description) = &declaration.description {
                    store.set_bitstream_description(id, description)?;
                }
                id
            }
        };

        if declaration.primary {
            store.set_primary_bitstream(bundle, bitstream)?;
        }
        debug!(item = %item, bundle = %declaration.bundle, "Added bitstream {}", declaration.name());
        Ok(bitstream)
    }

    /// Post-install steps: bitstream options, then the extra collections
    fn finish(&self, item: Uuid, entry: &ManifestEntry, additional: &[Uuid]) -> IngestResult<()> {
        self.apply_bitstream_options(item, entry)?;
        for &collection in additional {
            self.ports.store.add_to_collection(item, collection)?;
        }
        Ok(())
    }

    /// Apply permission, description and IIIF options to installed bitstreams
    fn apply_bitstream_options(&self, item: Uuid, entry: &ManifestEntry) -> IngestResult<()> {
        let pending: Vec<&BitstreamDeclaration> = entry
            .bitstreams
            .iter()
            .filter(|d| matches!(d.source, BitstreamSource::Inline { .. }) && d.has_options())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let Some(record) = self.ports.store.item(item)? else {
            return Err(IngestError::Persistence(saf_common::Error::NotFound(format!(
                "item {}",
                item
            ))));
        };

        for declaration in pending {
            match find_bitstream(&record, declaration.name()) {
                Some(bitstream) => self.apply_options(bitstream, declaration)?,
                None => warn!(
                    item = %item,
                    "No bitstream named {:?} to apply options to",
                    declaration.name()
                ),
            }
        }
        Ok(())
    }

    fn apply_options(
        &self,
        bitstream: &BitstreamRecord,
        declaration: &BitstreamDeclaration,
    ) -> IngestResult<()> {
        let store = self.ports.store;

        if let Some(permission) = &declaration.permission {
            match (permission.action, store.find_group(&permission.group)?) {
                (None, _) => warn!(
                    bitstream = %bitstream.name,
                    "Invalid permissions flag, keeping default policies"
                ),
                (_, None) => warn!(
                    bitstream = %bitstream.name,
                    "Group {:?} not found, keeping default policies",
                    permission.group
                ),
                (Some(action), Some(group)) => {
                    store.clear_policies(bitstream.id)?;
                    store.add_policy(bitstream.id, action, group)?;
                    debug!(
                        bitstream = %bitstream.name,
                        "Set {} policy for group {}",
                        action.as_str(),
                        permission.group
                    );
                }
            }
        }

        if let Some(description) = &declaration.description {
            store.set_bitstream_description(bitstream.id, description)?;
        }

        let iiif = &declaration.iiif;
        for (element, qualifier, value) in [
            ("label", None, &iiif.label),
            ("image", Some("height"), &iiif.height),
            ("image", Some("width"), &iiif.width),
            ("toc", None, &iiif.toc),
        ] {
            if let Some(value) = value {
                let field = MetadataField::new(IIIF_SCHEMA, element, qualifier);
                store.add_bitstream_metadata(bitstream.id, &MetadataValue::new(&field, value.as_str()))?;
            }
        }
        Ok(())
    }

    /// Check every field against the registry; problems are reported, not fatal
    fn validate_metadata(&self, entry: &ManifestEntry) -> IngestResult<()> {
        let catalog = self.ports.metadata;
        for value in &entry.metadata {
            let field = value.field();
            if !catalog.schema_exists(&field.schema)? {
                error!(folder = %entry.folder, "Schema {:?} is not registered", field.schema);
            } else if !catalog.field_exists(&field)? {
                error!(folder = %entry.folder, "Field {} is not registered", field);
            } else {
                info!(folder = %entry.folder, "{} = {:?}", field, value.value);
            }
        }
        Ok(())
    }
}

/// First non-internal bitstream with exactly this name
fn find_bitstream<'r>(record: &'r ItemRecord, name: &str) -> Option<&'r BitstreamRecord> {
    record
        .bitstreams()
        .map(|(_, bs)| bs)
        .find(|bs| !bs.internal && bs.name == name)
}

/// Remove an item from every collection; unpublished items are discarded
pub(crate) fn withdraw_item(store: &dyn Store, item: Uuid) -> IngestResult<()> {
    let Some(record) = store.item(item)? else {
        return Ok(());
    };

    if record.collections.is_empty() {
        store.discard_workspace_item(item)?;
    } else {
        for collection in &record.collections {
            store.remove_from_collection(item, *collection)?;
        }
    }
    Ok(())
}
