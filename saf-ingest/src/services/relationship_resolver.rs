//! Cross-item relationship resolution
//!
//! Runs after every folder of a batch is built, so `folderName:` references
//! can point at any item of the batch regardless of folder order.

use saf_common::model::{ItemRecord, MetadataField, ObjectRef, RelationshipType};
use saf_common::Ports;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::manifest::RelationshipsDeclaration;

use super::change_tracker::BatchContext;

const FOLDER_PREFIXES: [&str; 2] = ["folderName:", "rowName:"];

/// A raw relationship target, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemReference {
    /// Another folder of the same batch
    Folder(String),
    /// The single item carrying `value` in `field`
    Metadata { field: MetadataField, value: String },
    Handle(String),
    InternalId(String),
}

impl ItemReference {
    /// Classify a raw identifier; first matching rule wins
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        for prefix in FOLDER_PREFIXES {
            if let Some(folder) = raw.strip_prefix(prefix) {
                return ItemReference::Folder(folder.trim().to_string());
            }
        }

        if let Some((key, value)) = raw.split_once(':') {
            if !key.contains('/') {
                if let Some(field) = MetadataField::parse(key) {
                    return ItemReference::Metadata {
                        field,
                        value: value.to_string(),
                    };
                }
            }
        }

        if raw.contains('/') {
            ItemReference::Handle(raw.to_string())
        } else {
            ItemReference::InternalId(raw.to_string())
        }
    }
}

/// Pick the relationship type named `key` that fits the two entity types
///
/// Returns the type and whether the origin item is on its left side. All
/// comparisons ignore case.
pub fn match_relationship_type<'t>(
    candidates: &'t [RelationshipType],
    key: &str,
    origin_type: &str,
    target_type: &str,
) -> Option<(&'t RelationshipType, bool)> {
    candidates.iter().find_map(|t| {
        if t.left_type.eq_ignore_ascii_case(origin_type)
            && t.leftward.eq_ignore_ascii_case(key)
            && t.right_type.eq_ignore_ascii_case(target_type)
        {
            Some((t, true))
        } else if t.right_type.eq_ignore_ascii_case(origin_type)
            && t.rightward.eq_ignore_ascii_case(key)
            && t.left_type.eq_ignore_ascii_case(target_type)
        {
            Some((t, false))
        } else {
            None
        }
    })
}

pub struct RelationshipResolver<'a> {
    ports: Ports<'a>,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(ports: Ports<'a>) -> Self {
        Self { ports }
    }

    /// Resolve a reference to an item id
    pub fn resolve(&self, reference: &ItemReference, batch: &BatchContext) -> IngestResult<Uuid> {
        match reference {
            ItemReference::Folder(folder) => batch.item_for_folder(folder).ok_or_else(|| {
                IngestError::Resolution(format!("no item imported from folder {:?}", folder))
            }),
            ItemReference::Metadata { field, value } => {
                let matches = self.ports.metadata.find_items_by_value(field, value)?;
                match matches.as_slice() {
                    [item] => Ok(*item),
                    [] => Err(IngestError::Resolution(format!(
                        "no item has {} = {:?}",
                        field, value
                    ))),
                    _ => Err(IngestError::Resolution(format!(
                        "{} items have {} = {:?}; reference is ambiguous",
                        matches.len(),
                        field,
                        value
                    ))),
                }
            }
            ItemReference::Handle(handle) => match self.ports.identity.resolve_handle(handle)? {
                Some(ObjectRef::Item(item)) => Ok(item),
                Some(ObjectRef::Collection(_)) => Err(IngestError::Resolution(format!(
                    "handle {} names a collection, not an item",
                    handle
                ))),
                None => Err(IngestError::Resolution(format!("unknown handle {}", handle))),
            },
            ItemReference::InternalId(id) => self
                .ports
                .identity
                .find_item(id)?
                .ok_or_else(|| IngestError::Resolution(format!("no item with id {}", id))),
        }
    }

    /// Create every relationship `origin` declares; returns how many
    pub fn link(
        &self,
        origin: Uuid,
        declaration: &RelationshipsDeclaration,
        batch: &BatchContext,
    ) -> IngestResult<usize> {
        let origin_record = self.load(origin)?;
        let mut created = 0;

        for (type_name, raw) in declaration.pairs() {
            let target = self.resolve(&ItemReference::parse(raw), batch)?;
            let target_record = self.load(target)?;
            self.link_one(&origin_record, &target_record, type_name)?;
            created += 1;
        }
        Ok(created)
    }

    fn link_one(
        &self,
        origin: &ItemRecord,
        target: &ItemRecord,
        key: &str,
    ) -> IngestResult<Uuid> {
        let origin_type = entity_type(origin)?;
        let target_type = entity_type(target)?;

        let candidates = self.ports.relationships.find_types_by_name(key)?;
        let Some((relationship_type, origin_is_left)) =
            match_relationship_type(&candidates, key, origin_type, target_type)
        else {
            return Err(IngestError::Resolution(format!(
                "no relationship type {:?} between {} and {}",
                key, origin_type, target_type
            )));
        };

        let (left, right) = if origin_is_left {
            (origin.id, target.id)
        } else {
            (target.id, origin.id)
        };

        let catalog = self.ports.relationships;
        let left_place = catalog.next_left_place(left)?;
        let right_place = catalog.next_right_place(right)?;
        let relationship =
            catalog.create_relationship(left, right, relationship_type.id, left_place, right_place)?;

        info!(
            left = %left,
            right = %right,
            "Created relationship {} ({} -> {})",
            key, origin_type, target_type
        );
        debug!(left_place, right_place, relationship = %relationship, "Relationship placed");
        Ok(relationship)
    }

    fn load(&self, item: Uuid) -> IngestResult<ItemRecord> {
        self.ports
            .store
            .item(item)?
            .ok_or_else(|| IngestError::Resolution(format!("item {} no longer exists", item)))
    }
}

fn entity_type(item: &ItemRecord) -> IngestResult<&str> {
    item.entity_type().ok_or_else(|| {
        IngestError::Resolution(format!("item {} has no dspace.entity.type", item.id))
    })
}
