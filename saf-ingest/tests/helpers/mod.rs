//! Test Helper Utilities
//!
//! Shared utilities for testing saf-ingest

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;

pub use fixtures::{dublin_core_xml, ArchiveFixture, ItemFolder};
pub use log_capture::{capture_logs, LogCapture};
