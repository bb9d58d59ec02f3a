//! `relationships` file codec

use crate::error::{IngestError, IngestResult};
use std::path::Path;

use super::RELATIONSHIPS_FILE;

/// Relation-type name to the raw identifiers of the items it links to
///
/// Type names keep first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipsDeclaration {
    entries: Vec<(String, Vec<String>)>,
}

impl RelationshipsDeclaration {
    pub fn push(&mut self, type_name: &str, identifier: &str) {
        match self.entries.iter_mut().find(|(name, _)| name == type_name) {
            Some((_, identifiers)) => identifiers.push(identifier.to_string()),
            None => self
                .entries
                .push((type_name.to_string(), vec![identifier.to_string()])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every `(type name, identifier)` pair in declaration order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, identifiers)| {
            identifiers.iter().map(move |id| (name.as_str(), id.as_str()))
        })
    }

    pub fn identifiers(&self, type_name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == type_name)
            .map(|(_, ids)| ids.as_slice())
    }
}

/// Parse the item's `relationships` file; absent means no relations
pub fn parse_relationships(item_dir: &Path) -> IngestResult<RelationshipsDeclaration> {
    let path = item_dir.join(RELATIONSHIPS_FILE);
    let mut declaration = RelationshipsDeclaration::default();
    if !path.exists() {
        return Ok(declaration);
    }

    for line in std::fs::read_to_string(&path)?.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, identifier) = match line.split_once(char::is_whitespace) {
            Some((key, rest)) if !rest.trim().is_empty() => (key, rest.trim()),
            _ => {
                return Err(IngestError::manifest(
                    &path,
                    format!("relationship line without identifier: {:?}", line),
                ))
            }
        };

        // relation.isAuthorOfPublication -> isAuthorOfPublication
        let type_name = key.rsplit('.').next().unwrap_or(key);
        declaration.push(type_name, identifier);
    }

    Ok(declaration)
}
