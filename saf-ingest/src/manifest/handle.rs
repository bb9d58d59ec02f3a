//! `handle` file codec

use crate::error::IngestResult;
use std::path::Path;
use tracing::info;

use super::HANDLE_FILE;

/// First line of the item's `handle` file, trimmed
///
/// An absent or empty file means the store assigns a handle.
pub fn parse_handle(item_dir: &Path) -> IngestResult<Option<String>> {
    let path = item_dir.join(HANDLE_FILE);
    if !path.exists() {
        info!("No handle file in {}, one will be assigned", item_dir.display());
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let handle = content
        .lines()
        .next()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    if handle.is_none() {
        info!("Empty handle file in {}, one will be assigned", item_dir.display());
    }
    Ok(handle)
}

pub fn write_handle(item_dir: &Path, handle: &str) -> IngestResult<()> {
    std::fs::write(item_dir.join(HANDLE_FILE), format!("{}\n", handle))?;
    Ok(())
}
