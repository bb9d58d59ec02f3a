//! SQLite-backed implementation of the engine ports
//!
//! The ports are synchronous, so the store owns a private current-thread
//! Tokio runtime and blocks on every `sqlx` call. Never call it from inside
//! another runtime.
//!
//! Inline bitstream bytes live as files named by bitstream id under the
//! assetstore directory; registered bitstreams are read from their declared
//! path.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use saf_common::model::{
    Action, BitstreamRecord, BundleRecord, CollectionRecord, ItemRecord, ItemState,
    MetadataField, MetadataValue, ObjectRef, RelationshipType, ResourcePolicy, DEFAULT_FIELDS,
    REGISTERED_PREFIX,
};
use saf_common::{Error, IdentityResolver, MetadataCatalog, RelationshipCatalog, Result, Store};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SqliteStore {
    runtime: Runtime,
    pool: SqlitePool,
    assetstore: PathBuf,
    handle_prefix: String,
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("corrupt id {:?}: {}", raw, e)))
}

fn metadata_from_row(row: &SqliteRow) -> Result<MetadataValue> {
    Ok(MetadataValue {
        schema: row.try_get("schema")?,
        element: row.try_get("element")?,
        qualifier: row.try_get("qualifier")?,
        language: row.try_get("language")?,
        value: row.try_get("value")?,
    })
}

impl SqliteStore {
    /// Open the database and assetstore, seeding the default field registry
    pub fn open(db_path: &Path, assetstore: impl Into<PathBuf>, handle_prefix: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = runtime.block_on(super::init_database_pool(db_path))?;

        let assetstore = assetstore.into();
        fs::create_dir_all(&assetstore)?;

        let store = Self {
            runtime,
            pool,
            assetstore,
            handle_prefix: handle_prefix.to_string(),
        };
        for field in DEFAULT_FIELDS {
            store.register_field(field)?;
        }

        info!(
            "Opened store {} (assetstore {})",
            db_path.display(),
            store.assetstore.display()
        );
        Ok(store)
    }

    fn block_on<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        self.runtime.block_on(future)
    }

    /// Register a dotted metadata field
    pub fn register_field(&self, dotted: &str) -> Result<()> {
        let field = MetadataField::parse(dotted)
            .ok_or_else(|| Error::InvalidInput(format!("malformed field {:?}", dotted)))?;
        self.block_on(async {
            sqlx::query(
                "INSERT OR IGNORE INTO metadata_fields (schema, element, qualifier) VALUES (?, ?, ?)",
            )
            .bind(&field.schema)
            .bind(&field.element)
            .bind(field.qualifier.as_deref().unwrap_or(""))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    pub fn create_collection(&self, name: &str) -> Result<CollectionRecord> {
        self.block_on(async {
            let id = Uuid::new_v4();
            let handle = self.mint_handle().await?;

            sqlx::query("INSERT INTO collections (id, name, handle) VALUES (?, ?, ?)")
                .bind(id.to_string())
                .bind(name)
                .bind(&handle)
                .execute(&self.pool)
                .await?;
            self.bind_handle(&handle, "collection", id).await?;

            info!(collection = %id, "Created collection {:?} ({})", name, handle);
            Ok(CollectionRecord {
                id,
                name: name.to_string(),
                handle: Some(handle),
                template: Vec::new(),
            })
        })
    }

    pub fn set_collection_template(&self, collection: Uuid, template: &[MetadataValue]) -> Result<()> {
        let json = serde_json::to_string(template)
            .map_err(|e| Error::Internal(format!("Failed to serialize template: {}", e)))?;
        self.block_on(async {
            let result = sqlx::query("UPDATE collections SET template = ? WHERE id = ?")
                .bind(json)
                .bind(collection.to_string())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("collection {}", collection)));
            }
            Ok(())
        })
    }

    /// Create a group, or return the existing one with this name
    pub fn create_group(&self, name: &str) -> Result<Uuid> {
        if let Some(existing) = self.find_group(name)? {
            return Ok(existing);
        }
        let id = Uuid::new_v4();
        self.block_on(async {
            sqlx::query("INSERT INTO groups (id, name) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(name)
                .execute(&self.pool)
                .await?;
            Ok(id)
        })
    }

    pub fn add_relationship_type(
        &self,
        left_type: &str,
        right_type: &str,
        leftward: &str,
        rightward: &str,
    ) -> Result<RelationshipType> {
        let relationship_type = RelationshipType {
            id: Uuid::new_v4(),
            left_type: left_type.to_string(),
            right_type: right_type.to_string(),
            leftward: leftward.to_string(),
            rightward: rightward.to_string(),
        };
        self.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO relationship_types (id, left_type, right_type, leftward, rightward)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(relationship_type.id.to_string())
            .bind(left_type)
            .bind(right_type)
            .bind(leftward)
            .bind(rightward)
            .execute(&self.pool)
            .await?;
            Ok(())
        })?;
        Ok(relationship_type)
    }

    /// Next handle under the configured prefix that nothing is bound to
    async fn mint_handle(&self) -> Result<String> {
        loop {
            let value: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO sequences (name, value) VALUES ('handle', 1)
                ON CONFLICT(name) DO UPDATE SET value = value + 1
                RETURNING value
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

            let handle = format!("{}/{}", self.handle_prefix, value);
            if !self.handle_exists(&handle).await? {
                return Ok(handle);
            }
        }
    }

    async fn handle_exists(&self, handle: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM handles WHERE handle = ?")
            .bind(handle)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn bind_handle(&self, handle: &str, object_type: &str, id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO handles (handle, object_type, object_id) VALUES (?, ?, ?)")
            .bind(handle)
            .bind(object_type)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn item_state(&self, item: Uuid) -> Result<Option<ItemState>> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM items WHERE id = ?")
            .bind(item.to_string())
            .fetch_optional(&self.pool)
            .await?;
        state
            .map(|s| {
                ItemState::parse(&s)
                    .ok_or_else(|| Error::Internal(format!("unknown item state {:?}", s)))
            })
            .transpose()
    }

    async fn next_place(&self, sql: &str, owner: Uuid) -> Result<i64> {
        let place: i64 = sqlx::query_scalar(sql)
            .bind(owner.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(place)
    }

    async fn insert_metadata(&self, object: Uuid, value: &MetadataValue) -> Result<()> {
        let place = self
            .next_place(
                "SELECT COALESCE(MAX(place) + 1, 0) FROM metadata_values WHERE object_id = ?",
                object,
            )
            .await?;
        sqlx::query(
            r#"
            INSERT INTO metadata_values (object_id, schema, element, qualifier, language, value, place)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(object.to_string())
        .bind(&value.schema)
        .bind(&value.element)
        .bind(&value.qualifier)
        .bind(&value.language)
        .bind(&value.value)
        .bind(place)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_metadata(&self, object: Uuid) -> Result<Vec<MetadataValue>> {
        let rows = sqlx::query(
            r#"
            SELECT schema, element, qualifier, language, value
            FROM metadata_values
            WHERE object_id = ?
            ORDER BY place, rowid
            "#,
        )
        .bind(object.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(metadata_from_row).collect::<Result<Vec<_>>>()
    }

    async fn load_bitstreams(&self, bundle: Uuid) -> Result<Vec<BitstreamRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, internal_id, store_number, internal, checksum, size
            FROM bitstreams
            WHERE bundle_id = ?
            ORDER BY place
            "#,
        )
        .bind(bundle.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut bitstreams = Vec::with_capacity(rows.len());
        for row in rows {
            let id = parse_id(&row.try_get::<String, _>("id")?)?;

            let mut policies = Vec::new();
            let policy_rows = sqlx::query("SELECT action, group_id FROM policies WHERE bitstream_id = ?")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await?;
            for policy in policy_rows {
                let action: String = policy.try_get("action")?;
                let action = Action::parse(&action)
                    .ok_or_else(|| Error::Internal(format!("unknown policy action {:?}", action)))?;
                policies.push(ResourcePolicy {
                    action,
                    group: parse_id(&policy.try_get::<String, _>("group_id")?)?,
                });
            }

            bitstreams.push(BitstreamRecord {
                id,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                internal_id: row.try_get("internal_id")?,
                store_number: row.try_get("store_number")?,
                internal: row.try_get("internal")?,
                checksum: row.try_get("checksum")?,
                size: row.try_get::<i64, _>("size")?.max(0) as u64,
                metadata: self.load_metadata(id).await?,
                policies,
            });
        }
        Ok(bitstreams)
    }

    async fn load_item(&self, item: Uuid) -> Result<Option<ItemRecord>> {
        let Some(row) = sqlx::query("SELECT handle, state, owning_collection FROM items WHERE id = ?")
            .bind(item.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let state: String = row.try_get("state")?;
        let state = ItemState::parse(&state)
            .ok_or_else(|| Error::Internal(format!("unknown item state {:?}", state)))?;
        let owning_collection = row
            .try_get::<Option<String>, _>("owning_collection")?
            .map(|c| parse_id(&c))
            .transpose()?;

        let collections: Vec<String> = sqlx::query_scalar(
            "SELECT collection_id FROM item_collections WHERE item_id = ? ORDER BY place",
        )
        .bind(item.to_string())
        .fetch_all(&self.pool)
        .await?;

        let bundle_rows = sqlx::query(
            "SELECT id, name, primary_bitstream FROM bundles WHERE item_id = ? ORDER BY place",
        )
        .bind(item.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut bundles = Vec::with_capacity(bundle_rows.len());
        for bundle in bundle_rows {
            let id = parse_id(&bundle.try_get::<String, _>("id")?)?;
            bundles.push(BundleRecord {
                id,
                name: bundle.try_get("name")?,
                primary_bitstream: bundle
                    .try_get::<Option<String>, _>("primary_bitstream")?
                    .map(|b| parse_id(&b))
                    .transpose()?,
                bitstreams: self.load_bitstreams(id).await?,
            });
        }

        Ok(Some(ItemRecord {
            id: item,
            handle: row.try_get("handle")?,
            state,
            owning_collection,
            collections: collections
                .iter()
                .map(|c| parse_id(c))
                .collect::<Result<Vec<_>>>()?,
            metadata: self.load_metadata(item).await?,
            bundles,
        }))
    }

    /// Remove an item and everything hanging off it
    async fn delete_item(&self, item: Uuid) -> Result<()> {
        let id = item.to_string();
        let bitstreams = sqlx::query(
            r#"
            SELECT b.id, b.internal_id FROM bitstreams b
            JOIN bundles u ON b.bundle_id = u.id
            WHERE u.item_id = ?
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        let mut asset_files = Vec::new();
        for row in &bitstreams {
            let bitstream: String = row.try_get("id")?;
            let internal_id: String = row.try_get("internal_id")?;
            if !internal_id.starts_with(REGISTERED_PREFIX) {
                asset_files.push(self.assetstore.join(internal_id));
            }
            sqlx::query("DELETE FROM metadata_values WHERE object_id = ?")
                .bind(&bitstream)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM policies WHERE bitstream_id = ?")
                .bind(&bitstream)
                .execute(&mut *tx)
                .await?;
        }

        for statement in [
            "DELETE FROM bitstreams WHERE bundle_id IN (SELECT id FROM bundles WHERE item_id = ?)",
            "DELETE FROM bundles WHERE item_id = ?",
            "DELETE FROM metadata_values WHERE object_id = ?",
            "DELETE FROM item_collections WHERE item_id = ?",
            "DELETE FROM handles WHERE object_id = ?",
            "DELETE FROM items WHERE id = ?",
        ] {
            sqlx::query(statement).bind(&id).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM relationships WHERE left_item = ? OR right_item = ?")
            .bind(&id)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for path in asset_files {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove asset {}: {}", path.display(), e);
            }
        }
        debug!(item = %item, "Deleted item");
        Ok(())
    }

    async fn insert_bitstream(
        &self,
        bundle: Uuid,
        bitstream: &BitstreamRecord,
    ) -> Result<()> {
        let place = self
            .next_place(
                "SELECT COALESCE(MAX(place) + 1, 0) FROM bitstreams WHERE bundle_id = ?",
                bundle,
            )
            .await?;
        sqlx::query(
            r#"
            INSERT INTO bitstreams (
                id, bundle_id, name, description, internal_id,
                store_number, internal, checksum, size, place
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bitstream.id.to_string())
        .bind(bundle.to_string())
        .bind(&bitstream.name)
        .bind(&bitstream.description)
        .bind(&bitstream.internal_id)
        .bind(bitstream.store_number)
        .bind(bitstream.internal)
        .bind(&bitstream.checksum)
        .bind(bitstream.size as i64)
        .bind(place)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bitstream_exists(&self, bitstream: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bitstreams WHERE id = ?")
            .bind(bitstream.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn find_by_id(&self, table: &str, raw: &str) -> Result<Option<Uuid>> {
        let Ok(id) = Uuid::parse_str(raw.trim()) else {
            return Ok(None);
        };
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok((count > 0).then_some(id))
    }

    async fn next_relationship_place(&self, column: &str, item: Uuid) -> Result<i32> {
        let (place_column, item_column) = match column {
            "left" => ("left_place", "left_item"),
            _ => ("right_place", "right_item"),
        };
        let sql = format!(
            "SELECT COALESCE(MAX({}) + 1, 0) FROM relationships WHERE {} = ?",
            place_column, item_column
        );
        let place = self.next_place(&sql, item).await?;
        i32::try_from(place).map_err(|_| Error::Internal(format!("place {} out of range", place)))
    }
}

impl Store for SqliteStore {
    fn create_workspace_item(&self, collection: Uuid, use_template: bool) -> Result<Uuid> {
        self.block_on(async {
            let template: Option<String> =
                sqlx::query_scalar("SELECT template FROM collections WHERE id = ?")
                    .bind(collection.to_string())
                    .fetch_optional(&self.pool)
                    .await?;
            let template =
                template.ok_or_else(|| Error::NotFound(format!("collection {}", collection)))?;

            let item = Uuid::new_v4();
            sqlx::query("INSERT INTO items (id, state, owning_collection) VALUES (?, ?, ?)")
                .bind(item.to_string())
                .bind(ItemState::Workspace.as_str())
                .bind(collection.to_string())
                .execute(&self.pool)
                .await?;

            if use_template {
                let values: Vec<MetadataValue> = serde_json::from_str(&template).map_err(|e| {
                    Error::Internal(format!("Failed to deserialize template: {}", e))
                })?;
                for value in &values {
                    self.insert_metadata(item, value).await?;
                }
            }
            Ok(item)
        })
    }

    fn discard_workspace_item(&self, item: Uuid) -> Result<()> {
        self.block_on(async {
            match self.item_state(item).await? {
                Some(ItemState::Archived) => Err(Error::InvalidInput(format!(
                    "item {} is already installed",
                    item
                ))),
                Some(_) => self.delete_item(item).await,
                None => Err(Error::NotFound(format!("item {}", item))),
            }
        })
    }

    fn install_item(&self, item: Uuid, handle: Option<&str>) -> Result<String> {
        self.block_on(async {
            let owning: Option<Option<String>> =
                sqlx::query_scalar("SELECT owning_collection FROM items WHERE id = ?")
                    .bind(item.to_string())
                    .fetch_optional(&self.pool)
                    .await?;
            let owning = owning.ok_or_else(|| Error::NotFound(format!("item {}", item)))?;

            let handle = match handle {
                Some(h) => {
                    if self.handle_exists(h).await? {
                        return Err(Error::InvalidInput(format!("handle {} already in use", h)));
                    }
                    h.to_string()
                }
                None => self.mint_handle().await?,
            };

            sqlx::query("UPDATE items SET state = ?, handle = ? WHERE id = ?")
                .bind(ItemState::Archived.as_str())
                .bind(&handle)
                .bind(item.to_string())
                .execute(&self.pool)
                .await?;
            self.bind_handle(&handle, "item", item).await?;

            if let Some(collection) = owning {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO item_collections (item_id, collection_id, place)
                    VALUES (?, ?, (SELECT COALESCE(MAX(place) + 1, 0) FROM item_collections WHERE item_id = ?))
                    "#,
                )
                .bind(item.to_string())
                .bind(&collection)
                .bind(item.to_string())
                .execute(&self.pool)
                .await?;
            }
            Ok(handle)
        })
    }

    fn start_workflow(&self, item: Uuid, notify: bool) -> Result<()> {
        self.block_on(async {
            let result = sqlx::query("UPDATE items SET state = ? WHERE id = ?")
                .bind(ItemState::Workflow.as_str())
                .bind(item.to_string())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("item {}", item)));
            }
            debug!(item = %item, notify, "Item entered workflow");
            Ok(())
        })
    }

    fn add_to_collection(&self, item: Uuid, collection: Uuid) -> Result<()> {
        self.block_on(async {
            if self.find_by_id("collections", &collection.to_string()).await?.is_none() {
                return Err(Error::NotFound(format!("collection {}", collection)));
            }
            if self.item_state(item).await?.is_none() {
                return Err(Error::NotFound(format!("item {}", item)));
            }
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO item_collections (item_id, collection_id, place)
                VALUES (?, ?, (SELECT COALESCE(MAX(place) + 1, 0) FROM item_collections WHERE item_id = ?))
                "#,
            )
            .bind(item.to_string())
            .bind(collection.to_string())
            .bind(item.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn remove_from_collection(&self, item: Uuid, collection: Uuid) -> Result<()> {
        self.block_on(async {
            if self.item_state(item).await?.is_none() {
                return Err(Error::NotFound(format!("item {}", item)));
            }
            sqlx::query("DELETE FROM item_collections WHERE item_id = ? AND collection_id = ?")
                .bind(item.to_string())
                .bind(collection.to_string())
                .execute(&self.pool)
                .await?;

            let remaining: Option<String> = sqlx::query_scalar(
                "SELECT collection_id FROM item_collections WHERE item_id = ? ORDER BY place LIMIT 1",
            )
            .bind(item.to_string())
            .fetch_optional(&self.pool)
            .await?;

            match remaining {
                Some(first) => {
                    sqlx::query(
                        "UPDATE items SET owning_collection = ? WHERE id = ? AND owning_collection = ?",
                    )
                    .bind(first)
                    .bind(item.to_string())
                    .bind(collection.to_string())
                    .execute(&self.pool)
                    .await?;
                    Ok(())
                }
                None => self.delete_item(item).await,
            }
        })
    }

    fn item(&self, item: Uuid) -> Result<Option<ItemRecord>> {
        self.block_on(self.load_item(item))
    }

    fn add_metadata(&self, item: Uuid, value: &MetadataValue) -> Result<()> {
        self.block_on(async {
            if self.item_state(item).await?.is_none() {
                return Err(Error::NotFound(format!("item {}", item)));
            }
            self.insert_metadata(item, value).await
        })
    }

    fn find_bundle(&self, item: Uuid, name: &str) -> Result<Option<Uuid>> {
        self.block_on(async {
            let id: Option<String> = sqlx::query_scalar(
                "SELECT id FROM bundles WHERE item_id = ? AND name = ? ORDER BY place LIMIT 1",
            )
            .bind(item.to_string())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            id.map(|id| parse_id(&id)).transpose()
        })
    }

    fn create_bundle(&self, item: Uuid, name: &str) -> Result<Uuid> {
        self.block_on(async {
            if self.item_state(item).await?.is_none() {
                return Err(Error::NotFound(format!("item {}", item)));
            }
            let place = self
                .next_place(
                    "SELECT COALESCE(MAX(place) + 1, 0) FROM bundles WHERE item_id = ?",
                    item,
                )
                .await?;
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO bundles (id, item_id, name, place) VALUES (?, ?, ?, ?)")
                .bind(id.to_string())
                .bind(item.to_string())
                .bind(name)
                .bind(place)
                .execute(&self.pool)
                .await?;
            Ok(id)
        })
    }

    fn create_bitstream(&self, bundle: Uuid, name: &str, source: &Path) -> Result<Uuid> {
        let bytes = fs::read(source)?;
        let checksum = format!("{:x}", Sha256::digest(&bytes));

        let id = Uuid::new_v4();
        let asset = self.assetstore.join(id.to_string());
        fs::write(&asset, &bytes)?;

        let bitstream = BitstreamRecord {
            id,
            name: name.to_string(),
            description: None,
            internal_id: id.to_string(),
            store_number: 0,
            internal: false,
            checksum: Some(checksum),
            size: bytes.len() as u64,
            metadata: Vec::new(),
            policies: Vec::new(),
        };

        if let Err(e) = self.block_on(self.insert_bitstream(bundle, &bitstream)) {
            if let Err(cleanup) = fs::remove_file(&asset) {
                warn!("Failed to remove orphaned asset {}: {}", asset.display(), cleanup);
            }
            return Err(e);
        }
        debug!(bitstream = %id, "Stored {} ({} bytes)", name, bitstream.size);
        Ok(id)
    }

    fn register_bitstream(
        &self,
        bundle: Uuid,
        store_number: i32,
        path: &str,
        name: &str,
    ) -> Result<Uuid> {
        let bitstream = BitstreamRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            internal_id: format!("{}{}", REGISTERED_PREFIX, path),
            store_number,
            internal: false,
            checksum: None,
            size: 0,
            metadata: Vec::new(),
            policies: Vec::new(),
        };
        self.block_on(self.insert_bitstream(bundle, &bitstream))?;
        Ok(bitstream.id)
    }

    fn set_primary_bitstream(&self, bundle: Uuid, bitstream: Uuid) -> Result<()> {
        self.block_on(async {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM bitstreams WHERE id = ? AND bundle_id = ?")
                    .bind(bitstream.to_string())
                    .bind(bundle.to_string())
                    .fetch_one(&self.pool)
                    .await?;
            if count == 0 {
                return Err(Error::InvalidInput(format!(
                    "bitstream {} is not in bundle {}",
                    bitstream, bundle
                )));
            }
            sqlx::query("UPDATE bundles SET primary_bitstream = ? WHERE id = ?")
                .bind(bitstream.to_string())
                .bind(bundle.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn set_bitstream_description(&self, bitstream: Uuid, description: &str) -> Result<()> {
        self.block_on(async {
            let result = sqlx::query("UPDATE bitstreams SET description = ? WHERE id = ?")
                .bind(description)
                .bind(bitstream.to_string())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("bitstream {}", bitstream)));
            }
            Ok(())
        })
    }

    fn add_bitstream_metadata(&self, bitstream: Uuid, value: &MetadataValue) -> Result<()> {
        self.block_on(async {
            if !self.bitstream_exists(bitstream).await? {
                return Err(Error::NotFound(format!("bitstream {}", bitstream)));
            }
            self.insert_metadata(bitstream, value).await
        })
    }

    fn clear_policies(&self, bitstream: Uuid) -> Result<()> {
        self.block_on(async {
            if !self.bitstream_exists(bitstream).await? {
                return Err(Error::NotFound(format!("bitstream {}", bitstream)));
            }
            sqlx::query("DELETE FROM policies WHERE bitstream_id = ?")
                .bind(bitstream.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn add_policy(&self, bitstream: Uuid, action: Action, group: Uuid) -> Result<()> {
        self.block_on(async {
            if self.find_by_id("groups", &group.to_string()).await?.is_none() {
                return Err(Error::NotFound(format!("group {}", group)));
            }
            if !self.bitstream_exists(bitstream).await? {
                return Err(Error::NotFound(format!("bitstream {}", bitstream)));
            }
            sqlx::query("INSERT INTO policies (bitstream_id, action, group_id) VALUES (?, ?, ?)")
                .bind(bitstream.to_string())
                .bind(action.as_str())
                .bind(group.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn find_group(&self, name: &str) -> Result<Option<Uuid>> {
        self.block_on(async {
            let id: Option<String> = sqlx::query_scalar("SELECT id FROM groups WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            id.map(|id| parse_id(&id)).transpose()
        })
    }

    fn retrieve_bitstream(&self, bitstream: Uuid) -> Result<Vec<u8>> {
        let internal_id: Option<String> = self.block_on(async {
            let id = sqlx::query_scalar("SELECT internal_id FROM bitstreams WHERE id = ?")
                .bind(bitstream.to_string())
                .fetch_optional(&self.pool)
                .await?;
            Ok(id)
        })?;
        let internal_id =
            internal_id.ok_or_else(|| Error::NotFound(format!("bitstream {}", bitstream)))?;

        let path = match internal_id.strip_prefix(REGISTERED_PREFIX) {
            Some(registered) => PathBuf::from(registered),
            None => self.assetstore.join(&internal_id),
        };
        Ok(fs::read(path)?)
    }
}

impl IdentityResolver for SqliteStore {
    fn resolve_handle(&self, handle: &str) -> Result<Option<ObjectRef>> {
        self.block_on(async {
            let row = sqlx::query("SELECT object_type, object_id FROM handles WHERE handle = ?")
                .bind(handle.trim())
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else {
                return Ok(None);
            };

            let object_type: String = row.try_get("object_type")?;
            let id = parse_id(&row.try_get::<String, _>("object_id")?)?;
            match object_type.as_str() {
                "item" => Ok(Some(ObjectRef::Item(id))),
                "collection" => Ok(Some(ObjectRef::Collection(id))),
                other => Err(Error::Internal(format!("unknown handle object type {:?}", other))),
            }
        })
    }

    fn find_item(&self, id: &str) -> Result<Option<Uuid>> {
        self.block_on(self.find_by_id("items", id))
    }

    fn find_collection(&self, id: &str) -> Result<Option<Uuid>> {
        self.block_on(self.find_by_id("collections", id))
    }
}

impl RelationshipCatalog for SqliteStore {
    fn find_types_by_name(&self, name: &str) -> Result<Vec<RelationshipType>> {
        self.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT id, left_type, right_type, leftward, rightward
                FROM relationship_types
                WHERE lower(leftward) = lower(?) OR lower(rightward) = lower(?)
                ORDER BY rowid
                "#,
            )
            .bind(name)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

            rows.iter()
                .map(|row| -> Result<RelationshipType> {
                    Ok(RelationshipType {
                        id: parse_id(&row.try_get::<String, _>("id")?)?,
                        left_type: row.try_get("left_type")?,
                        right_type: row.try_get("right_type")?,
                        leftward: row.try_get("leftward")?,
                        rightward: row.try_get("rightward")?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
    }

    fn next_left_place(&self, item: Uuid) -> Result<i32> {
        self.block_on(self.next_relationship_place("left", item))
    }

    fn next_right_place(&self, item: Uuid) -> Result<i32> {
        self.block_on(self.next_relationship_place("right", item))
    }

    fn create_relationship(
        &self,
        left: Uuid,
        right: Uuid,
        relationship_type: Uuid,
        left_place: i32,
        right_place: i32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO relationships (id, left_item, right_item, type_id, left_place, right_place)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(left.to_string())
            .bind(right.to_string())
            .bind(relationship_type.to_string())
            .bind(left_place)
            .bind(right_place)
            .execute(&self.pool)
            .await?;
            Ok(id)
        })
    }
}

impl MetadataCatalog for SqliteStore {
    fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.block_on(async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metadata_fields WHERE schema = ?")
                .bind(schema)
                .fetch_one(&self.pool)
                .await?;
            Ok(count > 0)
        })
    }

    fn field_exists(&self, field: &MetadataField) -> Result<bool> {
        self.block_on(async {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM metadata_fields WHERE schema = ? AND element = ? AND qualifier = ?",
            )
            .bind(&field.schema)
            .bind(&field.element)
            .bind(field.qualifier.as_deref().unwrap_or(""))
            .fetch_one(&self.pool)
            .await?;
            Ok(count > 0)
        })
    }

    fn find_items_by_value(&self, field: &MetadataField, value: &str) -> Result<Vec<Uuid>> {
        self.block_on(async {
            let ids: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT m.object_id FROM metadata_values m
                JOIN items i ON i.id = m.object_id
                WHERE m.schema = ? AND m.element = ? AND m.qualifier IS ? AND m.value = ?
                ORDER BY m.object_id
                "#,
            )
            .bind(&field.schema)
            .bind(&field.element)
            .bind(&field.qualifier)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
            ids.iter().map(|id| parse_id(id)).collect::<Result<Vec<_>>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(&dir.path().join("saf.db"), dir.path().join("assetstore"), "10673").unwrap()
    }

    #[test]
    fn test_install_mints_handle_under_prefix() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let collection = store.create_collection("Theses").unwrap();

        let item = store.create_workspace_item(collection.id, false).unwrap();
        let handle = store.install_item(item, None).unwrap();

        assert!(handle.starts_with("10673/"));
        assert_ne!(Some(&handle), collection.handle.as_ref());
        assert_eq!(store.resolve_handle(&handle).unwrap(), Some(ObjectRef::Item(item)));

        let record = store.item(item).unwrap().unwrap();
        assert_eq!(record.state, ItemState::Archived);
        assert_eq!(record.collections, vec![collection.id]);
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let collection = store.create_collection("Theses").unwrap();

        let first = store.create_workspace_item(collection.id, false).unwrap();
        store.install_item(first, Some("10673/500")).unwrap();
        let second = store.create_workspace_item(collection.id, false).unwrap();

        assert!(matches!(
            store.install_item(second, Some("10673/500")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bitstream_bytes_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let collection = store.create_collection("Theses").unwrap();
        let item = store.create_workspace_item(collection.id, false).unwrap();
        let bundle = store.create_bundle(item, "ORIGINAL").unwrap();

        let source = dir.path().join("a.txt");
        fs::write(&source, b"hello").unwrap();
        let bitstream = store.create_bitstream(bundle, "a.txt", &source).unwrap();
        store.set_primary_bitstream(bundle, bitstream).unwrap();

        assert_eq!(store.retrieve_bitstream(bitstream).unwrap(), b"hello");
        let record = store.item(item).unwrap().unwrap();
        let (bundle_record, bs) = record.bitstreams().next().unwrap();
        assert_eq!(bundle_record.primary_bitstream, Some(bitstream));
        assert_eq!(bs.size, 5);
        assert_eq!(
            bs.checksum.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_removal_from_last_collection_deletes_item() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let collection = store.create_collection("Theses").unwrap();
        let item = store.create_workspace_item(collection.id, false).unwrap();
        let handle = store.install_item(item, None).unwrap();

        store.remove_from_collection(item, collection.id).unwrap();

        assert!(store.item(item).unwrap().is_none());
        assert_eq!(store.resolve_handle(&handle).unwrap(), None);
    }

    #[test]
    fn test_find_items_by_value_distinguishes_qualifier() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let collection = store.create_collection("Theses").unwrap();
        let item = store.create_workspace_item(collection.id, false).unwrap();

        let other = MetadataField::new("dc", "identifier", Some("other"));
        store.add_metadata(item, &MetadataValue::new(&other, "XYZ123")).unwrap();

        assert_eq!(store.find_items_by_value(&other, "XYZ123").unwrap(), vec![item]);
        let bare = MetadataField::new("dc", "identifier", None);
        assert!(store.find_items_by_value(&bare, "XYZ123").unwrap().is_empty());
    }

    #[test]
    fn test_relationship_places_append() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kind = store
            .add_relationship_type("Publication", "Person", "isAuthorOfPublication", "isPublicationOfAuthor")
            .unwrap();
        let (left, right) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(store.next_left_place(left).unwrap(), 0);
        store.create_relationship(left, right, kind.id, 0, 0).unwrap();
        assert_eq!(store.next_left_place(left).unwrap(), 1);
        assert_eq!(store.next_right_place(right).unwrap(), 1);

        let found = store.find_types_by_name("ISPUBLICATIONOFAUTHOR").unwrap();
        assert_eq!(found, vec![kind]);
    }

    #[test]
    fn test_default_registry_seeded() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.schema_exists("dc").unwrap());
        assert!(store
            .field_exists(&MetadataField::new("dspace", "entity", Some("type")))
            .unwrap());
        assert!(!store.schema_exists("local").unwrap());
    }
}
