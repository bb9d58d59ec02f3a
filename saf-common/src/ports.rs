//! Port traits between the archive engine and its persistence collaborators
//!
//! The engine never touches storage directly. Everything goes through these
//! four traits, which are synchronous; a store backed by an async driver
//! blocks internally.

use crate::model::{
    Action, ItemRecord, MetadataField, MetadataValue, ObjectRef, RelationshipType,
};
use crate::Result;
use std::path::Path;
use uuid::Uuid;

/// Object store: items, bundles, bitstreams and their policies
pub trait Store {
    /// Create a pre-publication container in `collection`, optionally seeded
    /// from the collection's template metadata
    fn create_workspace_item(&self, collection: Uuid, use_template: bool) -> Result<Uuid>;

    /// Throw away a container that never reached the archive
    fn discard_workspace_item(&self, item: Uuid) -> Result<()>;

    /// Install a container, binding `handle` if given or minting one otherwise.
    /// Returns the handle the item ended up with.
    fn install_item(&self, item: Uuid, handle: Option<&str>) -> Result<String>;

    /// Hand a container to the review workflow
    fn start_workflow(&self, item: Uuid, notify: bool) -> Result<()>;

    fn add_to_collection(&self, item: Uuid, collection: Uuid) -> Result<()>;

    /// Remove an item from one collection. An item left in no collection is
    /// deleted.
    fn remove_from_collection(&self, item: Uuid, collection: Uuid) -> Result<()>;

    /// Snapshot of an item with metadata, bundles and bitstreams
    fn item(&self, item: Uuid) -> Result<Option<ItemRecord>>;

    fn add_metadata(&self, item: Uuid, value: &MetadataValue) -> Result<()>;

    /// First bundle on the item with this name
    fn find_bundle(&self, item: Uuid, name: &str) -> Result<Option<Uuid>>;

    fn create_bundle(&self, item: Uuid, name: &str) -> Result<Uuid>;

    /// Copy a file into storage as a new bitstream
    fn create_bitstream(&self, bundle: Uuid, name: &str, source: &Path) -> Result<Uuid>;

    /// Record a bitstream whose bytes already live in asset store `store_number`
    fn register_bitstream(
        &self,
        bundle: Uuid,
        store_number: i32,
        path: &str,
        name: &str,
    ) -> Result<Uuid>;

    fn set_primary_bitstream(&self, bundle: Uuid, bitstream: Uuid) -> Result<()>;

    fn set_bitstream_description(&self, bitstream: Uuid, description: &str) -> Result<()>;

    fn add_bitstream_metadata(&self, bitstream: Uuid, value: &MetadataValue) -> Result<()>;

    fn clear_policies(&self, bitstream: Uuid) -> Result<()>;

    fn add_policy(&self, bitstream: Uuid, action: Action, group: Uuid) -> Result<()>;

    fn find_group(&self, name: &str) -> Result<Option<Uuid>>;

    /// Bytes of a stored bitstream
    fn retrieve_bitstream(&self, bitstream: Uuid) -> Result<Vec<u8>>;
}

/// Handle and internal-id lookup
pub trait IdentityResolver {
    fn resolve_handle(&self, handle: &str) -> Result<Option<ObjectRef>>;

    /// Item by its internal id; malformed ids resolve to `None`
    fn find_item(&self, id: &str) -> Result<Option<Uuid>>;

    fn find_collection(&self, id: &str) -> Result<Option<Uuid>>;
}

/// Relationship types and placement
pub trait RelationshipCatalog {
    /// Types whose leftward or rightward name equals `name`, ignoring case
    fn find_types_by_name(&self, name: &str) -> Result<Vec<RelationshipType>>;

    fn next_left_place(&self, item: Uuid) -> Result<i32>;

    fn next_right_place(&self, item: Uuid) -> Result<i32>;

    fn create_relationship(
        &self,
        left: Uuid,
        right: Uuid,
        relationship_type: Uuid,
        left_place: i32,
        right_place: i32,
    ) -> Result<Uuid>;
}

/// Metadata registry and reverse lookup
pub trait MetadataCatalog {
    fn schema_exists(&self, schema: &str) -> Result<bool>;

    fn field_exists(&self, field: &MetadataField) -> Result<bool>;

    /// Items carrying `value` in `field`
    fn find_items_by_value(&self, field: &MetadataField, value: &str) -> Result<Vec<Uuid>>;
}

/// The full set of collaborators the engine needs, borrowed for one batch
#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub store: &'a dyn Store,
    pub identity: &'a dyn IdentityResolver,
    pub relationships: &'a dyn RelationshipCatalog,
    pub metadata: &'a dyn MetadataCatalog,
}

impl<'a> Ports<'a> {
    /// Borrow all four ports from one repository
    pub fn from_repository<R>(repository: &'a R) -> Self
    where
        R: Store + IdentityResolver + RelationshipCatalog + MetadataCatalog,
    {
        Self {
            store: repository,
            identity: repository,
            relationships: repository,
            metadata: repository,
        }
    }
}
