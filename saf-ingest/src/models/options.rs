//! Batch and export options

use serde::{Deserialize, Serialize};

/// Switches for one import/replace/delete invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Parse and validate only; nothing is persisted and no MapFile is written
    #[serde(default)]
    pub test: bool,

    /// Skip folders already recorded in the MapFile and append to it
    #[serde(default)]
    pub resume: bool,

    /// Send items to the review workflow instead of installing them
    #[serde(default)]
    pub use_workflow: bool,

    /// Notify reviewers when a workflow starts
    #[serde(default)]
    pub workflow_notify: bool,

    /// Log per-folder progress at debug instead of info
    #[serde(default)]
    pub quiet: bool,

    /// Seed new items from the collection template
    #[serde(default)]
    pub template: bool,

    /// Export created items back into their source folders at batch end
    #[serde(default)]
    pub write_back: bool,
}

/// Options for regenerating an item folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Copy stored bytes of inline bitstreams into the folder
    #[serde(default)]
    pub copy_bitstreams: bool,

    /// Drop fields the receiving repository regenerates on install
    #[serde(default)]
    pub migrate: bool,

    /// Prefix marking `dc.identifier.uri` values derived from the handle
    #[serde(default)]
    pub handle_uri_prefix: Option<String>,
}
