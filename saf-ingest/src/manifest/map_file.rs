//! MapFile: the `folder identifier` ledger of a batch

use crate::error::{IngestError, IngestResult};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub folder: String,
    /// Handle (contains `/`) or internal id
    pub identifier: String,
}

/// Parsed MapFile, in first-appearance folder order
#[derive(Debug, Clone, Default)]
pub struct MapFile {
    entries: Vec<MapEntry>,
}

impl MapFile {
    /// Read a MapFile; every non-blank line must be exactly two tokens
    ///
    /// A folder listed twice keeps its last identifier.
    pub fn read(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut map = MapFile::default();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [folder, identifier] = tokens.as_slice() else {
                return Err(IngestError::manifest(
                    path,
                    format!("line {} is not `folder identifier`: {:?}", index + 1, line),
                ));
            };
            map.insert(folder, identifier);
        }

        Ok(map)
    }

    fn insert(&mut self, folder: &str, identifier: &str) {
        match self.entries.iter_mut().find(|e| e.folder == folder) {
            Some(entry) => entry.identifier = identifier.to_string(),
            None => self.entries.push(MapEntry {
                folder: folder.to_string(),
                identifier: identifier.to_string(),
            }),
        }
    }

    pub fn get(&self, folder: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.folder == folder)
            .map(|e| e.identifier.as_str())
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Folder names recorded so far; the skip set of a resumed batch
    pub fn folders(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.folder.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `value` fits in one whitespace-separated MapFile field
pub fn is_map_token(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

/// Line-at-a-time MapFile writer
///
/// Each record is flushed immediately so an interrupted batch can resume
/// from the last recorded folder.
pub struct MapFileWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl MapFileWriter {
    /// Open for append when resuming, truncate otherwise
    pub fn open(path: &Path, append: bool) -> IngestResult<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn record(&mut self, folder: &str, identifier: &str) -> IngestResult<()> {
        if !is_map_token(folder) || !is_map_token(identifier) {
            return Err(IngestError::Validation(format!(
                "cannot record {:?} -> {:?}: MapFile fields must be single tokens",
                folder, identifier
            )));
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{} {}", folder, identifier)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close
    pub fn finish(mut self) -> IngestResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for MapFileWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush map file {}: {}", self.path.display(), e);
            }
        }
    }
}
