//! # SAF Common Library
//!
//! Shared code for the Simple Archive Format tooling:
//! - Error and result types
//! - Configuration loading and archive root resolution
//! - Domain model (items, bundles, bitstreams, relationship types)
//! - Port traits the archive engine talks to
//! - In-memory repository implementing every port

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod ports;

pub use error::{Error, Result};
pub use memory::MemoryRepository;
pub use ports::{IdentityResolver, MetadataCatalog, Ports, RelationshipCatalog, Store};
