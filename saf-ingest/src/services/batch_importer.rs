//! Batch import, replace and delete
//!
//! Items are committed one folder at a time; there is no batch rollback.
//! A failure on folder k leaves folders 1..k-1 persisted and recorded in the
//! MapFile, and a resumed run picks up at folder k.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use saf_common::model::ObjectRef;
use saf_common::Ports;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::manifest::{parse_collections, parse_relationships, write_handle, MapFile, MapFileWriter};
use crate::models::{BatchOptions, BatchSession, BatchState, ExportOptions, FolderState, SkipReason};

use super::change_tracker::{BatchContext, ChangeEvent, ChangeKind};
use super::exporter::Exporter;
use super::folder_scanner::{FolderScanner, SourceLayout};
use super::item_builder::{withdraw_item, ItemBuilder};
use super::progress;
use super::relationship_resolver::RelationshipResolver;

pub struct BatchImporter<'a> {
    ports: Ports<'a>,
    archive_root: PathBuf,
    options: BatchOptions,
    export_options: ExportOptions,
}

impl<'a> BatchImporter<'a> {
    pub fn new(ports: Ports<'a>, archive_root: impl Into<PathBuf>, options: BatchOptions) -> Self {
        Self {
            ports,
            archive_root: archive_root.into(),
            options,
            export_options: ExportOptions::default(),
        }
    }

    /// Options used when writing items back at batch end
    pub fn with_export_options(mut self, export_options: ExportOptions) -> Self {
        self.export_options = export_options;
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Import every item folder of `source_dir`
    ///
    /// `collections` overrides the per-folder `collections` files.
    pub fn import_batch(
        &self,
        collections: Option<&[Uuid]>,
        source_dir: &Path,
        map_file: &Path,
    ) -> IngestResult<BatchSession> {
        let mut session = BatchSession::new(source_dir.display().to_string());
        info!(session_id = %session.session_id, source = %source_dir.display(), "Starting batch import");

        let result = self.run_import(&mut session, collections, source_dir, map_file);
        self.conclude(session, result)
    }

    /// Replace the items recorded in `map_file` with fresh builds of their folders
    ///
    /// Each old item's handle is written into its folder first so the
    /// replacement keeps the same persistent identifier.
    pub fn replace_batch(
        &self,
        collections: Option<&[Uuid]>,
        source_dir: &Path,
        map_file: &Path,
    ) -> IngestResult<BatchSession> {
        let mut session = BatchSession::new(source_dir.display().to_string());
        info!(session_id = %session.session_id, source = %source_dir.display(), "Starting batch replace");

        let result = self.run_replace(&mut session, collections, source_dir, map_file);
        self.conclude(session, result)
    }

    /// Withdraw every item recorded in `map_file`
    pub fn delete_batch(&self, map_file: &Path) -> IngestResult<BatchSession> {
        let mut session = BatchSession::new(map_file.display().to_string());
        info!(session_id = %session.session_id, mapfile = %map_file.display(), "Starting batch delete");

        let result = self.run_delete(&mut session, map_file);
        self.conclude(session, result)
    }

    fn conclude(&self, mut session: BatchSession, result: IngestResult<()>) -> IngestResult<BatchSession> {
        match result {
            Ok(()) => {
                session.transition_to(BatchState::Completed);
                info!(
                    session_id = %session.session_id,
                    imported = session.imported().count(),
                    skipped = session.skipped().count(),
                    relationships = session.relationships_created,
                    "Batch completed"
                );
                Ok(session)
            }
            Err(e) => {
                session.transition_to(BatchState::Failed);
                error!(
                    session_id = %session.session_id,
                    processed = session.folders.len(),
                    "Batch failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn run_import(
        &self,
        session: &mut BatchSession,
        collections: Option<&[Uuid]>,
        source_dir: &Path,
        map_file: &Path,
    ) -> IngestResult<()> {
        let scanner = FolderScanner::new(&self.archive_root);
        let layout = scanner.layout(source_dir)?;
        let folders = scanner.item_folders(&layout)?;
        let base = layout.base_dir().to_path_buf();
        let mut ctx = BatchContext::new();

        let skip = if self.options.resume && !self.options.test {
            self.load_skip_set(map_file, &base, &folders, &mut ctx)?
        } else {
            HashSet::new()
        };

        let mut writer = if self.options.test {
            None
        } else {
            Some(MapFileWriter::open(map_file, self.options.resume)?)
        };

        session.transition_to(BatchState::Importing);
        let builder = ItemBuilder::new(self.ports, &self.options);
        let total = folders.len();

        for (index, folder) in folders.iter().enumerate() {
            session.update_progress(index, total, folder.clone());

            if skip.contains(folder) {
                progress!(self.options.quiet, folder = %folder, "Already imported, skipping");
                session.record(folder, ctx.item_for_folder(folder), FolderState::Skipped {
                    reason: SkipReason::AlreadyImported,
                });
                continue;
            }

            let item_dir = base.join(folder);
            let Some(targets) = self.target_collections(collections, &item_dir)? else {
                warn!(folder = %folder, "Skipping: no collection given and no collections file");
                session.record(folder, None, FolderState::Skipped {
                    reason: SkipReason::NoCollection,
                });
                continue;
            };

            let built = builder.build(&targets, &item_dir, folder)?;
            if let (Some(writer), Some(identifier)) = (writer.as_mut(), &built.identifier) {
                writer.record(folder, identifier)?;
            }
            if let Some(item) = built.item_id {
                ctx.consume(ChangeEvent::item(item, ChangeKind::Create));
            }
            ctx.register_folder(folder, item_dir, built.item_id);
            session.record(folder, built.item_id, FolderState::Imported {
                identifier: built.identifier,
            });
        }
        session.update_progress(total, total, "Items built".to_string());

        if let Some(writer) = writer {
            writer.finish()?;
        }

        self.link_and_sync(session, &mut ctx)
    }

    fn run_replace(
        &self,
        session: &mut BatchSession,
        collections: Option<&[Uuid]>,
        source_dir: &Path,
        map_file: &Path,
    ) -> IngestResult<()> {
        let scanner = FolderScanner::new(&self.archive_root);
        let layout = scanner.layout(source_dir)?;
        let base = layout.base_dir().to_path_buf();
        let map = MapFile::read(map_file)?;
        let mut ctx = BatchContext::new();

        let mut writer = if self.options.test {
            None
        } else {
            Some(MapFileWriter::open(map_file, false)?)
        };

        session.transition_to(BatchState::Importing);
        let builder = ItemBuilder::new(self.ports, &self.options);
        let total = map.len();

        for (index, entry) in map.entries().iter().enumerate() {
            session.update_progress(index, total, entry.folder.clone());

            let item_dir = base.join(&entry.folder);
            if !item_dir.is_dir() {
                return Err(IngestError::Validation(format!(
                    "MapFile folder {} does not exist",
                    item_dir.display()
                )));
            }

            let old = self.resolve_stored(&entry.identifier)?.ok_or_else(|| {
                IngestError::Resolution(format!(
                    "cannot locate item {} recorded for folder {}",
                    entry.identifier, entry.folder
                ))
            })?;

            if !self.options.test {
                if let Some(handle) = self.ports.store.item(old)?.and_then(|r| r.handle) {
                    write_handle(&item_dir, &handle)?;
                }
                self.withdraw(old)?;
                ctx.consume(ChangeEvent::item(old, ChangeKind::Delete));
                progress!(self.options.quiet, folder = %entry.folder, "Withdrew {}", entry.identifier);
            }

            let Some(targets) = self.target_collections(collections, &item_dir)? else {
                warn!(folder = %entry.folder, "Skipping: no collection given and no collections file");
                session.record(&entry.folder, None, FolderState::Skipped {
                    reason: SkipReason::NoCollection,
                });
                continue;
            };

            let built = builder.build(&targets, &item_dir, &entry.folder)?;
            if let (Some(writer), Some(identifier)) = (writer.as_mut(), &built.identifier) {
                writer.record(&entry.folder, identifier)?;
            }
            if let Some(item) = built.item_id {
                ctx.consume(ChangeEvent::item(item, ChangeKind::Create));
            }
            ctx.register_folder(&entry.folder, item_dir, built.item_id);
            session.record(&entry.folder, built.item_id, FolderState::Imported {
                identifier: built.identifier,
            });
        }

        if let Some(writer) = writer {
            writer.finish()?;
        }

        self.link_and_sync(session, &mut ctx)
    }

    fn run_delete(&self, session: &mut BatchSession, map_file: &Path) -> IngestResult<()> {
        let map = MapFile::read(map_file)?;
        session.transition_to(BatchState::Importing);
        let total = map.len();

        for (index, entry) in map.entries().iter().enumerate() {
            session.update_progress(index, total, entry.folder.clone());

            match self.resolve_stored(&entry.identifier)? {
                Some(item) => {
                    if !self.options.test {
                        self.withdraw(item)?;
                    }
                    progress!(self.options.quiet, folder = %entry.folder, "Deleted {}", entry.identifier);
                    session.record(&entry.folder, Some(item), FolderState::Deleted {
                        identifier: entry.identifier.clone(),
                    });
                }
                None => {
                    warn!(
                        folder = %entry.folder,
                        "Cannot locate item {} - already deleted?",
                        entry.identifier
                    );
                    session.record(&entry.folder, None, FolderState::Skipped {
                        reason: SkipReason::NotFound,
                    });
                }
            }
        }
        Ok(())
    }

    /// Relationship pass over the whole folder table, then optional write-back
    fn link_and_sync(&self, session: &mut BatchSession, ctx: &mut BatchContext) -> IngestResult<()> {
        session.transition_to(BatchState::Linking);
        let resolver = RelationshipResolver::new(self.ports);
        let table: &BatchContext = ctx;

        for (folder, record) in table.folders() {
            let declaration = parse_relationships(&record.dir)?;
            if declaration.is_empty() {
                continue;
            }
            match record.item {
                Some(item) => {
                    session.relationships_created += resolver.link(item, &declaration, table)?;
                }
                None => {
                    for (type_name, identifier) in declaration.pairs() {
                        info!(folder, "Would add relationship {} -> {}", type_name, identifier);
                    }
                }
            }
        }

        if self.options.write_back && !self.options.test {
            session.transition_to(BatchState::Syncing);
            let exporter = Exporter::new(self.ports, &self.archive_root, self.export_options.clone());
            let changes = ctx.take_changes();
            for item in changes.to_update {
                exporter.export_item(item, ctx.folder_dir(item))?;
            }
        }
        Ok(())
    }

    /// Read the MapFile of a resumed batch into the skip set
    ///
    /// Recorded folders stay in the folder table so later relationship
    /// references can still target them.
    /// Folders of this source already recorded in the MapFile
    ///
    /// Entries for folders outside the current source are ignored.
    fn load_skip_set(
        &self,
        map_file: &Path,
        base: &Path,
        folders: &[String],
        ctx: &mut BatchContext,
    ) -> IngestResult<HashSet<String>> {
        if !map_file.exists() {
            warn!("Resume requested but {} does not exist yet", map_file.display());
            return Ok(HashSet::new());
        }

        let map = MapFile::read(map_file)?;
        let present: HashSet<&str> = folders.iter().map(String::as_str).collect();
        let mut skip = HashSet::new();
        for entry in map.entries() {
            if !present.contains(entry.folder.as_str()) {
                debug!(folder = %entry.folder, "MapFile entry not in source, ignoring");
                continue;
            }
            let item = self.resolve_stored(&entry.identifier)?;
            if item.is_none() {
                warn!(
                    folder = %entry.folder,
                    "Recorded item {} cannot be resolved",
                    entry.identifier
                );
            }
            ctx.register_folder(&entry.folder, base.join(&entry.folder), item);
            skip.insert(entry.folder.clone());
        }
        info!("Resuming: {} folders already imported", skip.len());
        Ok(skip)
    }

    fn target_collections(
        &self,
        explicit: Option<&[Uuid]>,
        item_dir: &Path,
    ) -> IngestResult<Option<Vec<Uuid>>> {
        match explicit {
            Some(collections) if !collections.is_empty() => Ok(Some(collections.to_vec())),
            _ => parse_collections(item_dir, self.ports.identity),
        }
    }

    /// MapFile identifier to item: handles contain `/`, anything else is an id
    fn resolve_stored(&self, identifier: &str) -> IngestResult<Option<Uuid>> {
        if identifier.contains('/') {
            Ok(match self.ports.identity.resolve_handle(identifier)? {
                Some(ObjectRef::Item(item)) => Some(item),
                _ => None,
            })
        } else {
            Ok(self.ports.identity.find_item(identifier)?)
        }
    }

    fn withdraw(&self, item: Uuid) -> IngestResult<()> {
        withdraw_item(self.ports.store, item)
    }
}
