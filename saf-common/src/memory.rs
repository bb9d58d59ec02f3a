//! In-memory repository
//!
//! Implements every port over plain maps behind a mutex. Used by the test
//! suites and by test-mode runs that must not touch a real store.

use crate::model::{
    Action, BitstreamRecord, BundleRecord, CollectionRecord, ItemRecord, ItemState,
    MetadataField, MetadataValue, ObjectRef, Relationship, RelationshipType, ResourcePolicy,
    DEFAULT_FIELDS, REGISTERED_PREFIX,
};
use crate::ports::{IdentityResolver, MetadataCatalog, RelationshipCatalog, Store};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Handle prefix minted by the in-memory repository
pub const MEMORY_HANDLE_PREFIX: &str = "123456789";

#[derive(Default)]
struct State {
    items: HashMap<Uuid, ItemRecord>,
    collections: HashMap<Uuid, CollectionRecord>,
    handles: HashMap<String, ObjectRef>,
    groups: HashMap<Uuid, String>,
    relationship_types: Vec<RelationshipType>,
    relationships: Vec<Relationship>,
    schemas: HashSet<String>,
    fields: HashSet<MetadataField>,
    contents: HashMap<Uuid, Vec<u8>>,
    next_handle: u64,
    fail_installs: bool,
}

impl State {
    fn mint_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("{}/{}", MEMORY_HANDLE_PREFIX, self.next_handle)
    }

    fn item_mut(&mut self, id: Uuid) -> Result<&mut ItemRecord> {
        self.items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))
    }

    fn bundle_mut(&mut self, id: Uuid) -> Result<&mut BundleRecord> {
        self.items
            .values_mut()
            .flat_map(|i| i.bundles.iter_mut())
            .find(|b| b.id == id)
            .ok_or_else(|| Error::NotFound(format!("bundle {}", id)))
    }

    fn bitstream_mut(&mut self, id: Uuid) -> Result<&mut BitstreamRecord> {
        self.items
            .values_mut()
            .flat_map(|i| i.bundles.iter_mut())
            .flat_map(|b| b.bitstreams.iter_mut())
            .find(|bs| bs.id == id)
            .ok_or_else(|| Error::NotFound(format!("bitstream {}", id)))
    }

    fn remove_item(&mut self, id: Uuid) {
        if let Some(item) = self.items.remove(&id) {
            if let Some(handle) = item.handle {
                self.handles.remove(&handle);
            }
            for bs in item.bundles.iter().flat_map(|b| b.bitstreams.iter()) {
                self.contents.remove(&bs.id);
            }
            self.relationships
                .retain(|r| r.left_item != id && r.right_item != id);
        }
    }
}

/// Repository holding everything in process memory
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Create a repository with the standard `dc`, `dspace` and `iiif` registry
    pub fn new() -> Self {
        let repo = Self {
            state: Mutex::new(State::default()),
        };
        for field in DEFAULT_FIELDS {
            repo.register_field(field);
        }
        repo
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a dotted metadata field (and its schema)
    pub fn register_field(&self, dotted: &str) {
        if let Some(field) = MetadataField::parse(dotted) {
            let mut state = self.lock();
            state.schemas.insert(field.schema.clone());
            state.fields.insert(field);
        }
    }

    pub fn create_collection(&self, name: &str) -> CollectionRecord {
        let mut state = self.lock();
        let handle = state.mint_handle();
        let collection = CollectionRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            handle: Some(handle.clone()),
            template: Vec::new(),
        };
        state
            .handles
            .insert(handle, ObjectRef::Collection(collection.id));
        state.collections.insert(collection.id, collection.clone());
        collection
    }

    pub fn set_collection_template(&self, collection: Uuid, template: Vec<MetadataValue>) {
        if let Some(c) = self.lock().collections.get_mut(&collection) {
            c.template = template;
        }
    }

    pub fn create_group(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().groups.insert(id, name.to_string());
        id
    }

    pub fn add_relationship_type(
        &self,
        left_type: &str,
        right_type: &str,
        leftward: &str,
        rightward: &str,
    ) -> RelationshipType {
        let relationship_type = RelationshipType {
            id: Uuid::new_v4(),
            left_type: left_type.to_string(),
            right_type: right_type.to_string(),
            leftward: leftward.to_string(),
            rightward: rightward.to_string(),
        };
        self.lock()
            .relationship_types
            .push(relationship_type.clone());
        relationship_type
    }

    /// Make every following `install_item` call fail
    pub fn fail_installs(&self, enabled: bool) {
        self.lock().fail_installs = enabled;
    }

    pub fn items(&self) -> Vec<ItemRecord> {
        let mut items: Vec<ItemRecord> = self.lock().items.values().cloned().collect();
        items.sort_by_key(|i| i.id);
        items
    }

    pub fn items_in_state(&self, state: ItemState) -> Vec<ItemRecord> {
        self.items().into_iter().filter(|i| i.state == state).collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.lock().relationships.clone()
    }

    pub fn collection_members(&self, collection: Uuid) -> Vec<Uuid> {
        let mut members: Vec<Uuid> = self
            .lock()
            .items
            .values()
            .filter(|i| i.collections.contains(&collection))
            .map(|i| i.id)
            .collect();
        members.sort();
        members
    }
}

fn new_bitstream(name: &str, internal_id: String, store_number: i32, size: u64) -> BitstreamRecord {
    BitstreamRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        internal_id,
        store_number,
        internal: false,
        checksum: None,
        size,
        metadata: Vec::new(),
        policies: Vec::new(),
    }
}

impl Store for MemoryRepository {
    fn create_workspace_item(&self, collection: Uuid, use_template: bool) -> Result<Uuid> {
        let mut state = self.lock();
        let template = state
            .collections
            .get(&collection)
            .map(|c| c.template.clone())
            .ok_or_else(|| Error::NotFound(format!("collection {}", collection)))?;

        let item = ItemRecord {
            id: Uuid::new_v4(),
            handle: None,
            state: ItemState::Workspace,
            owning_collection: Some(collection),
            collections: Vec::new(),
            metadata: if use_template { template } else { Vec::new() },
            bundles: Vec::new(),
        };
        let id = item.id;
        state.items.insert(id, item);
        Ok(id)
    }

    fn discard_workspace_item(&self, item: Uuid) -> Result<()> {
        let mut state = self.lock();
        match state.items.get(&item).map(|i| i.state) {
            Some(ItemState::Archived) => Err(Error::InvalidInput(format!(
                "item {} is already installed",
                item
            ))),
            Some(_) => {
                state.remove_item(item);
                Ok(())
            }
            None => Err(Error::NotFound(format!("item {}", item))),
        }
    }

    fn install_item(&self, item: Uuid, handle: Option<&str>) -> Result<String> {
        let mut state = self.lock();
        if state.fail_installs {
            return Err(Error::Internal(format!("install of {} rejected", item)));
        }
        if let Some(h) = handle {
            if state.handles.contains_key(h) {
                return Err(Error::InvalidInput(format!("handle {} already in use", h)));
            }
        }
        let handle = match handle {
            Some(h) => h.to_string(),
            None => state.mint_handle(),
        };

        let record = state.item_mut(item)?;
        let owning = record.owning_collection;
        record.state = ItemState::Archived;
        record.handle = Some(handle.clone());
        if let Some(c) = owning {
            if !record.collections.contains(&c) {
                record.collections.push(c);
            }
        }
        state.handles.insert(handle.clone(), ObjectRef::Item(item));
        Ok(handle)
    }

    fn start_workflow(&self, item: Uuid, _notify: bool) -> Result<()> {
        let mut state = self.lock();
        let record = state.item_mut(item)?;
        record.state = ItemState::Workflow;
        Ok(())
    }

    fn add_to_collection(&self, item: Uuid, collection: Uuid) -> Result<()> {
        let mut state = self.lock();
        if !state.collections.contains_key(&collection) {
            return Err(Error::NotFound(format!("collection {}", collection)));
        }
        let record = state.item_mut(item)?;
        if !record.collections.contains(&collection) {
            record.collections.push(collection);
        }
        Ok(())
    }

    fn remove_from_collection(&self, item: Uuid, collection: Uuid) -> Result<()> {
        let mut state = self.lock();
        let record = state.item_mut(item)?;
        record.collections.retain(|c| *c != collection);
        if record.owning_collection == Some(collection) {
            record.owning_collection = record.collections.first().copied();
        }
        if record.collections.is_empty() {
            state.remove_item(item);
        }
        Ok(())
    }

    fn item(&self, item: Uuid) -> Result<Option<ItemRecord>> {
        Ok(self.lock().items.get(&item).cloned())
    }

    fn add_metadata(&self, item: Uuid, value: &MetadataValue) -> Result<()> {
        self.lock().item_mut(item)?.metadata.push(value.clone());
        Ok(())
    }

    fn find_bundle(&self, item: Uuid, name: &str) -> Result<Option<Uuid>> {
        let mut state = self.lock();
        let record = state.item_mut(item)?;
        Ok(record.bundles.iter().find(|b| b.name == name).map(|b| b.id))
    }

    fn create_bundle(&self, item: Uuid, name: &str) -> Result<Uuid> {
        let bundle = BundleRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            primary_bitstream: None,
            bitstreams: Vec::new(),
        };
        let id = bundle.id;
        self.lock().item_mut(item)?.bundles.push(bundle);
        Ok(id)
    }

    fn create_bitstream(&self, bundle: Uuid, name: &str, source: &Path) -> Result<Uuid> {
        let bytes = std::fs::read(source)?;
        let mut state = self.lock();
        let id = Uuid::new_v4();
        let mut bitstream = new_bitstream(name, id.to_string(), 0, bytes.len() as u64);
        bitstream.id = id;
        state.bundle_mut(bundle)?.bitstreams.push(bitstream);
        state.contents.insert(id, bytes);
        Ok(id)
    }

    fn register_bitstream(
        &self,
        bundle: Uuid,
        store_number: i32,
        path: &str,
        name: &str,
    ) -> Result<Uuid> {
        let bitstream = new_bitstream(
            name,
            format!("{}{}", REGISTERED_PREFIX, path),
            store_number,
            0,
        );
        let id = bitstream.id;
        self.lock().bundle_mut(bundle)?.bitstreams.push(bitstream);
        Ok(id)
    }

    fn set_primary_bitstream(&self, bundle: Uuid, bitstream: Uuid) -> Result<()> {
        let mut state = self.lock();
        let record = state.bundle_mut(bundle)?;
        if !record.bitstreams.iter().any(|b| b.id == bitstream) {
            return Err(Error::InvalidInput(format!(
                "bitstream {} is not in bundle {}",
                bitstream, bundle
            )));
        }
        record.primary_bitstream = Some(bitstream);
        Ok(())
    }

    fn set_bitstream_description(&self, bitstream: Uuid, description: &str) -> Result<()> {
        self.lock().bitstream_mut(bitstream)?.description = Some(description.to_string());
        Ok(())
    }

    fn add_bitstream_metadata(&self, bitstream: Uuid, value: &MetadataValue) -> Result<()> {
        self.lock()
            .bitstream_mut(bitstream)?
            .metadata
            .push(value.clone());
        Ok(())
    }

    fn clear_policies(&self, bitstream: Uuid) -> Result<()> {
        self.lock().bitstream_mut(bitstream)?.policies.clear();
        Ok(())
    }

    fn add_policy(&self, bitstream: Uuid, action: Action, group: Uuid) -> Result<()> {
        let mut state = self.lock();
        if !state.groups.contains_key(&group) {
            return Err(Error::NotFound(format!("group {}", group)));
        }
        state
            .bitstream_mut(bitstream)?
            .policies
            .push(ResourcePolicy { action, group });
        Ok(())
    }

    fn find_group(&self, name: &str) -> Result<Option<Uuid>> {
        Ok(self
            .lock()
            .groups
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id))
    }

    fn retrieve_bitstream(&self, bitstream: Uuid) -> Result<Vec<u8>> {
        let mut state = self.lock();
        if let Some(bytes) = state.contents.get(&bitstream) {
            return Ok(bytes.clone());
        }
        let record = state.bitstream_mut(bitstream)?;
        match record.registered_path() {
            Some(path) => Ok(std::fs::read(path)?),
            None => Err(Error::NotFound(format!("content of bitstream {}", bitstream))),
        }
    }
}

impl IdentityResolver for MemoryRepository {
    fn resolve_handle(&self, handle: &str) -> Result<Option<ObjectRef>> {
        Ok(self.lock().handles.get(handle).copied())
    }

    fn find_item(&self, id: &str) -> Result<Option<Uuid>> {
        let Ok(id) = Uuid::parse_str(id.trim()) else {
            return Ok(None);
        };
        Ok(self.lock().items.contains_key(&id).then_some(id))
    }

    fn find_collection(&self, id: &str) -> Result<Option<Uuid>> {
        let Ok(id) = Uuid::parse_str(id.trim()) else {
            return Ok(None);
        };
        Ok(self.lock().collections.contains_key(&id).then_some(id))
    }
}

impl RelationshipCatalog for MemoryRepository {
    fn find_types_by_name(&self, name: &str) -> Result<Vec<RelationshipType>> {
        Ok(self
            .lock()
            .relationship_types
            .iter()
            .filter(|t| t.leftward.eq_ignore_ascii_case(name) || t.rightward.eq_ignore_ascii_case(name))
            .cloned()
            .collect())
    }

    fn next_left_place(&self, item: Uuid) -> Result<i32> {
        Ok(self
            .lock()
            .relationships
            .iter()
            .filter(|r| r.left_item == item)
            .map(|r| r.left_place + 1)
            .max()
            .unwrap_or(0))
    }

    fn next_right_place(&self, item: Uuid) -> Result<i32> {
        Ok(self
            .lock()
            .relationships
            .iter()
            .filter(|r| r.right_item == item)
            .map(|r| r.right_place + 1)
            .max()
            .unwrap_or(0))
    }

    fn create_relationship(
        &self,
        left: Uuid,
        right: Uuid,
        relationship_type: Uuid,
        left_place: i32,
        right_place: i32,
    ) -> Result<Uuid> {
        let mut state = self.lock();
        for id in [left, right] {
            if !state.items.contains_key(&id) {
                return Err(Error::NotFound(format!("item {}", id)));
            }
        }
        let relationship = Relationship {
            id: Uuid::new_v4(),
            left_item: left,
            right_item: right,
            type_id: relationship_type,
            left_place,
            right_place,
        };
        let id = relationship.id;
        state.relationships.push(relationship);
        Ok(id)
    }
}

impl MetadataCatalog for MemoryRepository {
    fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self.lock().schemas.contains(schema))
    }

    fn field_exists(&self, field: &MetadataField) -> Result<bool> {
        Ok(self.lock().fields.contains(field))
    }

    fn find_items_by_value(&self, field: &MetadataField, value: &str) -> Result<Vec<Uuid>> {
        let mut found: Vec<Uuid> = self
            .lock()
            .items
            .values()
            .filter(|i| i.metadata.iter().any(|m| m.matches(field) && m.value == value))
            .map(|i| i.id)
            .collect();
        found.sort();
        Ok(found)
    }
}
