//! `collections` file codec

use crate::error::{IngestError, IngestResult};
use saf_common::model::ObjectRef;
use saf_common::IdentityResolver;
use std::path::Path;
use uuid::Uuid;

use super::COLLECTIONS_FILE;

/// Raw identifiers listed in the item's `collections` file
///
/// `None` when the file is absent or lists nothing.
pub fn read_collection_identifiers(item_dir: &Path) -> IngestResult<Option<Vec<String>>> {
    let path = item_dir.join(COLLECTIONS_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let identifiers: Vec<String> = std::fs::read_to_string(&path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok(if identifiers.is_empty() {
        None
    } else {
        Some(identifiers)
    })
}

/// Resolve the item's `collections` file to collection ids
///
/// Identifiers containing `/` are handles; anything else is an internal id.
/// Any line that does not name a collection is a hard error.
pub fn parse_collections(
    item_dir: &Path,
    identity: &dyn IdentityResolver,
) -> IngestResult<Option<Vec<Uuid>>> {
    let Some(identifiers) = read_collection_identifiers(item_dir)? else {
        return Ok(None);
    };

    let mut collections = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        let resolved = if identifier.contains('/') {
            match identity.resolve_handle(&identifier)? {
                Some(ObjectRef::Collection(id)) => Some(id),
                _ => None,
            }
        } else {
            identity.find_collection(&identifier)?
        };

        match resolved {
            Some(id) => collections.push(id),
            None => {
                return Err(IngestError::Resolution(format!(
                    "{} lists {:?}, which is not a collection",
                    item_dir.join(COLLECTIONS_FILE).display(),
                    identifier
                )))
            }
        }
    }
    Ok(Some(collections))
}
