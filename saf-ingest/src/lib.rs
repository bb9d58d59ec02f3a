//! saf-ingest library interface
//!
//! Simple Archive Format engine: manifest codec, batch import/replace/delete,
//! relationship resolution, manifest export, and a SQLite reference store.

pub mod config;
pub mod db;
pub mod error;
pub mod manifest;
pub mod models;
pub mod services;

pub use crate::error::{IngestError, IngestResult};
