//! SQLite reference store
//!
//! Schema setup lives here; `store` implements the engine ports on top of it.

pub mod store;

pub use store::SqliteStore;

use saf_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if needed) the database at `db_path` and ensure the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        handle TEXT,
        template TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id TEXT PRIMARY KEY,
        handle TEXT,
        state TEXT NOT NULL,
        owning_collection TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_collections (
        item_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        place INTEGER NOT NULL,
        PRIMARY KEY (item_id, collection_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS handles (
        handle TEXT PRIMARY KEY,
        object_type TEXT NOT NULL,
        object_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sequences (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata_fields (
        schema TEXT NOT NULL,
        element TEXT NOT NULL,
        qualifier TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (schema, element, qualifier)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata_values (
        object_id TEXT NOT NULL,
        schema TEXT NOT NULL,
        element TEXT NOT NULL,
        qualifier TEXT,
        language TEXT,
        value TEXT NOT NULL,
        place INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metadata_object ON metadata_values(object_id)",
    "CREATE INDEX IF NOT EXISTS idx_metadata_value ON metadata_values(schema, element, value)",
    r#"
    CREATE TABLE IF NOT EXISTS bundles (
        id TEXT PRIMARY KEY,
        item_id TEXT NOT NULL,
        name TEXT NOT NULL,
        primary_bitstream TEXT,
        place INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bitstreams (
        id TEXT PRIMARY KEY,
        bundle_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        internal_id TEXT NOT NULL,
        store_number INTEGER NOT NULL DEFAULT 0,
        internal INTEGER NOT NULL DEFAULT 0,
        checksum TEXT,
        size INTEGER NOT NULL DEFAULT 0,
        place INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS policies (
        bitstream_id TEXT NOT NULL,
        action TEXT NOT NULL,
        group_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relationship_types (
        id TEXT PRIMARY KEY,
        left_type TEXT NOT NULL,
        right_type TEXT NOT NULL,
        leftward TEXT NOT NULL,
        rightward TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relationships (
        id TEXT PRIMARY KEY,
        left_item TEXT NOT NULL,
        right_item TEXT NOT NULL,
        type_id TEXT NOT NULL,
        left_place INTEGER NOT NULL,
        right_place INTEGER NOT NULL
    )
    "#,
];

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized ({} statements)", SCHEMA.len());
    Ok(())
}
