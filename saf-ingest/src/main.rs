//! saf-ingest - Simple Archive Format command-line tool
//!
//! Imports, replaces, deletes and exports SAF item folders against the SQLite
//! reference store. Exit status is non-zero when a batch fails.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use saf_common::config::TomlConfig;
use saf_common::model::ObjectRef;
use saf_common::{IdentityResolver, Ports};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use saf_ingest::config::IngestConfig;
use saf_ingest::db::SqliteStore;
use saf_ingest::models::{BatchOptions, BatchSession};
use saf_ingest::services::{BatchImporter, Exporter};

/// Command-line arguments for saf-ingest
#[derive(Parser, Debug)]
#[command(name = "saf-ingest")]
#[command(about = "Simple Archive Format batch import and export")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/saf/config.toml, then /etc/saf/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory all SAF sources must live under
    #[arg(long, global = true)]
    archive_root: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Only log per-item progress at debug level
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct SourceArgs {
    /// Batch directory (collection mode) or single item directory
    #[arg(short, long)]
    source: PathBuf,

    /// MapFile recording folder -> identifier
    #[arg(short, long)]
    mapfile: PathBuf,

    /// Target collection id or handle; overrides per-folder collections files
    #[arg(short, long = "collection")]
    collections: Vec<String>,

    /// Validate only, persist nothing
    #[arg(long)]
    test: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every item folder of a batch
    Import {
        #[command(flatten)]
        source: SourceArgs,

        /// Skip folders already in the MapFile and append to it
        #[arg(long)]
        resume: bool,

        /// Send items to the review workflow instead of installing them
        #[arg(long)]
        workflow: bool,

        /// Notify reviewers when a workflow starts
        #[arg(long, requires = "workflow")]
        notify: bool,

        /// Seed items from the collection template
        #[arg(long)]
        template: bool,

        /// Export created items back into their folders afterwards
        #[arg(long)]
        write_back: bool,
    },

    /// Replace the items recorded in a MapFile with fresh builds of their folders
    Replace {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Withdraw every item recorded in a MapFile
    Delete {
        #[arg(short, long)]
        mapfile: PathBuf,

        /// Report what would be deleted, delete nothing
        #[arg(long)]
        test: bool,
    },

    /// Regenerate an item's SAF manifests in its folder
    Export {
        /// Item id or handle
        #[arg(short, long)]
        item: String,

        /// Folder to use when the item has no registered bitstreams
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// Copy stored bytes of inline bitstreams into the folder
        #[arg(long)]
        copy_bitstreams: bool,

        /// Drop fields the receiving repository regenerates
        #[arg(long)]
        migrate: bool,
    },

    /// Create a collection and print its id and handle
    CreateCollection {
        #[arg(short, long)]
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;
    init_logging(&toml_config)?;

    let config = IngestConfig::resolve(
        args.archive_root.as_deref(),
        args.database.as_deref(),
        &toml_config,
    )
    .context("Failed to resolve configuration")?;

    let store = SqliteStore::open(
        &config.database_path,
        &config.assetstore_dir,
        &config.handle_prefix,
    )
    .context("Failed to open store")?;
    let ports = Ports::from_repository(&store);

    match args.command {
        Command::Import {
            source,
            resume,
            workflow,
            notify,
            template,
            write_back,
        } => {
            let options = BatchOptions {
                test: source.test,
                resume,
                use_workflow: workflow,
                workflow_notify: notify,
                quiet: args.quiet,
                template,
                write_back,
            };
            let collections = resolve_collections(&store, &source.collections)?;
            let importer = BatchImporter::new(ports, &config.archive_root, options)
                .with_export_options(config.export_options(false, false));
            let session = importer
                .import_batch(collections.as_deref(), &source.source, &source.mapfile)
                .context("Import failed")?;
            report(&session)?;
        }
        Command::Replace { source } => {
            let options = BatchOptions {
                test: source.test,
                quiet: args.quiet,
                ..BatchOptions::default()
            };
            let collections = resolve_collections(&store, &source.collections)?;
            let importer = BatchImporter::new(ports, &config.archive_root, options);
            let session = importer
                .replace_batch(collections.as_deref(), &source.source, &source.mapfile)
                .context("Replace failed")?;
            report(&session)?;
        }
        Command::Delete { mapfile, test } => {
            let options = BatchOptions {
                test,
                quiet: args.quiet,
                ..BatchOptions::default()
            };
            let importer = BatchImporter::new(ports, &config.archive_root, options);
            let session = importer.delete_batch(&mapfile).context("Delete failed")?;
            report(&session)?;
        }
        Command::Export {
            item,
            folder,
            copy_bitstreams,
            migrate,
        } => {
            let item_id = resolve_item(&store, &item)?;
            let exporter = Exporter::new(
                ports,
                &config.archive_root,
                config.export_options(copy_bitstreams, migrate),
            );
            let written = exporter
                .export_item(item_id, folder.as_deref())
                .with_context(|| format!("Export of {} failed", item))?;
            println!("{}", written.display());
        }
        Command::CreateCollection { name } => {
            let collection = store
                .create_collection(&name)
                .context("Failed to create collection")?;
            println!(
                "{}\t{}",
                collection.id,
                collection.handle.unwrap_or_default()
            );
        }
    }

    Ok(())
}

fn init_logging(toml_config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));

    match &toml_config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    info!("saf-ingest {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Collection ids or handles from the command line; empty means "use collections files"
fn resolve_collections(store: &SqliteStore, raw: &[String]) -> Result<Option<Vec<Uuid>>> {
    if raw.is_empty() {
        return Ok(None);
    }

    raw.iter()
        .map(|identifier| {
            let found = if identifier.contains('/') {
                match store.resolve_handle(identifier)? {
                    Some(ObjectRef::Collection(id)) => Some(id),
                    _ => None,
                }
            } else {
                store.find_collection(identifier)?
            };
            found.ok_or_else(|| anyhow!("Unknown collection {}", identifier))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn resolve_item(store: &SqliteStore, raw: &str) -> Result<Uuid> {
    let found = if raw.contains('/') {
        match store.resolve_handle(raw)? {
            Some(ObjectRef::Item(id)) => Some(id),
            _ => None,
        }
    } else {
        store.find_item(raw)?
    };
    found.ok_or_else(|| anyhow!("Unknown item {}", raw))
}

/// Print the batch outcome as JSON on stdout
fn report(session: &BatchSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session).context("Failed to serialize report")?;
    println!("{}", json);
    Ok(())
}
