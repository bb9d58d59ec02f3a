//! Domain model for archived items
//!
//! These are plain snapshots handed across the port boundary. Stores own
//! the authoritative state; the engine only reads these records and issues
//! mutations through [`crate::ports::Store`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Schema assumed when a metadata file does not declare one
pub const DEFAULT_SCHEMA: &str = "dc";

/// Default bundle for content files
pub const ORIGINAL_BUNDLE: &str = "ORIGINAL";

/// Bundle for license files
pub const LICENSE_BUNDLE: &str = "LICENSE";

/// Bundle holding extracted full text
pub const TEXT_BUNDLE: &str = "TEXT";

/// Prefix marking the internal locator of a registered bitstream
pub const REGISTERED_PREFIX: &str = "-R";

/// Metadata schema used for IIIF viewer hints on bitstreams
pub const IIIF_SCHEMA: &str = "iiif";

/// Fields every fresh registry starts with
pub const DEFAULT_FIELDS: &[&str] = &[
    "dc.title",
    "dc.title.alternative",
    "dc.contributor.author",
    "dc.date.issued",
    "dc.date.accessioned",
    "dc.date.available",
    "dc.identifier.uri",
    "dc.identifier.other",
    "dc.description",
    "dc.description.abstract",
    "dc.description.provenance",
    "dc.format.extent",
    "dc.format.mimetype",
    "dc.language.iso",
    "dc.subject",
    "dc.type",
    "dc.rights",
    "dspace.entity.type",
    "iiif.label",
    "iiif.image.height",
    "iiif.image.width",
    "iiif.toc",
];

/// A metadata field identifier (`schema.element[.qualifier]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataField {
    pub schema: String,
    pub element: String,
    pub qualifier: Option<String>,
}

impl MetadataField {
    pub fn new(schema: &str, element: &str, qualifier: Option<&str>) -> Self {
        Self {
            schema: schema.to_string(),
            element: element.to_string(),
            qualifier: qualifier.map(str::to_string),
        }
    }

    /// Parse a dotted field name
    ///
    /// Accepts two or three non-empty segments. Anything else yields `None`.
    pub fn parse(dotted: &str) -> Option<Self> {
        let segments: Vec<&str> = dotted.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        match segments.as_slice() {
            [schema, element] => Some(Self::new(schema, element, None)),
            [schema, element, qualifier] => Some(Self::new(schema, element, Some(qualifier))),
            _ => None,
        }
    }

    /// Field holding an item's entity type
    pub fn entity_type() -> Self {
        Self::new("dspace", "entity", Some("type"))
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}.{}", self.schema, self.element, q),
            None => write!(f, "{}.{}", self.schema, self.element),
        }
    }
}

/// One metadata value attached to an item or bitstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub schema: String,
    pub element: String,
    pub qualifier: Option<String>,
    pub language: Option<String>,
    pub value: String,
}

impl MetadataValue {
    pub fn new(field: &MetadataField, value: impl Into<String>) -> Self {
        Self {
            schema: field.schema.clone(),
            element: field.element.clone(),
            qualifier: field.qualifier.clone(),
            language: None,
            value: value.into(),
        }
    }

    pub fn field(&self) -> MetadataField {
        MetadataField {
            schema: self.schema.clone(),
            element: self.element.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    pub fn matches(&self, field: &MetadataField) -> bool {
        self.schema == field.schema
            && self.element == field.element
            && self.qualifier == field.qualifier
    }
}

/// Item lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Pre-publication container, not yet visible
    Workspace,
    /// Waiting in a review workflow
    Workflow,
    /// Installed with a persistent handle
    Archived,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Workspace => "workspace",
            ItemState::Workflow => "workflow",
            ItemState::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workspace" => Some(ItemState::Workspace),
            "workflow" => Some(ItemState::Workflow),
            "archived" => Some(ItemState::Archived),
            _ => None,
        }
    }
}

/// Policy action granted to a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Write => "WRITE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READ" => Some(Action::Read),
            "WRITE" => Some(Action::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub action: Action,
    pub group: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitstreamRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Storage locator; `-R<path>` for registered bitstreams
    pub internal_id: String,
    pub store_number: i32,
    /// Internal bitstreams (e.g. generated thumbnails' bookkeeping) are never
    /// targets of manifest options
    pub internal: bool,
    pub checksum: Option<String>,
    pub size: u64,
    pub metadata: Vec<MetadataValue>,
    pub policies: Vec<ResourcePolicy>,
}

impl BitstreamRecord {
    pub fn is_registered(&self) -> bool {
        self.internal_id.starts_with(REGISTERED_PREFIX)
    }

    /// Path a registered bitstream was declared with
    pub fn registered_path(&self) -> Option<&str> {
        self.internal_id.strip_prefix(REGISTERED_PREFIX)
    }

    pub fn metadata_value(&self, field: &MetadataField) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.matches(field))
            .map(|m| m.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRecord {
    pub id: Uuid,
    pub name: String,
    pub primary_bitstream: Option<Uuid>,
    pub bitstreams: Vec<BitstreamRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Uuid,
    pub handle: Option<String>,
    pub state: ItemState,
    pub owning_collection: Option<Uuid>,
    pub collections: Vec<Uuid>,
    pub metadata: Vec<MetadataValue>,
    pub bundles: Vec<BundleRecord>,
}

impl ItemRecord {
    pub fn values(&self, field: &MetadataField) -> Vec<&str> {
        self.metadata
            .iter()
            .filter(|m| m.matches(field))
            .map(|m| m.value.as_str())
            .collect()
    }

    /// Entity type from `dspace.entity.type`, if any
    pub fn entity_type(&self) -> Option<&str> {
        self.values(&MetadataField::entity_type()).into_iter().next()
    }

    /// All bitstreams across bundles, paired with their bundle
    pub fn bitstreams(&self) -> impl Iterator<Item = (&BundleRecord, &BitstreamRecord)> {
        self.bundles
            .iter()
            .flat_map(|b| b.bitstreams.iter().map(move |bs| (b, bs)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: Uuid,
    pub name: String,
    pub handle: Option<String>,
    /// Metadata copied onto new items when the template is requested
    pub template: Vec<MetadataValue>,
}

/// Object resolved from a handle or internal id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectRef {
    Item(Uuid),
    Collection(Uuid),
}

/// A typed, directional relationship definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub id: Uuid,
    pub left_type: String,
    pub right_type: String,
    pub leftward: String,
    pub rightward: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub left_item: Uuid,
    pub right_item: Uuid,
    pub type_id: Uuid,
    pub left_place: i32,
    pub right_place: i32,
}
