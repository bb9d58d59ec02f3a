//! Runtime settings for the ingest tool
//!
//! Resolves every path the tool needs from CLI > ENV > TOML > OS default,
//! logging which tier supplied each value.

use saf_common::config::{
    resolve_archive_root, resolve_assetstore_dir, resolve_database_path, TomlConfig,
    ARCHIVE_ROOT_ENV, DATABASE_ENV,
};
use saf_common::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::ExportOptions;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub archive_root: PathBuf,
    pub database_path: PathBuf,
    pub assetstore_dir: PathBuf,
    pub handle_prefix: String,
    pub handle_uri_prefix: Option<String>,
}

impl IngestConfig {
    pub fn resolve(
        cli_archive_root: Option<&Path>,
        cli_database: Option<&Path>,
        toml_config: &TomlConfig,
    ) -> Result<Self> {
        let archive_root = resolve_archive_root(cli_archive_root, ARCHIVE_ROOT_ENV, toml_config)?;
        info!(
            "Archive root: {} (from {})",
            archive_root.display(),
            source_tier(cli_archive_root.is_some(), ARCHIVE_ROOT_ENV)
        );

        let database_path = resolve_database_path(cli_database, DATABASE_ENV, toml_config);
        info!(
            "Database: {} (from {})",
            database_path.display(),
            source_tier(cli_database.is_some(), DATABASE_ENV)
        );

        let assetstore_dir = resolve_assetstore_dir(toml_config, &database_path);

        Ok(Self {
            archive_root,
            database_path,
            assetstore_dir,
            handle_prefix: toml_config.handle_prefix.clone(),
            handle_uri_prefix: toml_config.handle_uri_prefix.clone(),
        })
    }

    /// Export options carrying the configured handle URI prefix
    pub fn export_options(&self, copy_bitstreams: bool, migrate: bool) -> ExportOptions {
        ExportOptions {
            copy_bitstreams,
            migrate,
            handle_uri_prefix: self.handle_uri_prefix.clone(),
        }
    }
}

fn source_tier(from_cli: bool, env_var_name: &str) -> &'static str {
    if from_cli {
        "command line"
    } else if std::env::var_os(env_var_name).is_some() {
        "environment"
    } else {
        "config file or default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_resolve_from_cli() {
        std::env::remove_var(ARCHIVE_ROOT_ENV);
        std::env::remove_var(DATABASE_ENV);
        let root = TempDir::new().unwrap();
        let db = root.path().join("state").join("saf.db");

        let mut toml_config = TomlConfig::default();
        toml_config.handle_uri_prefix = Some("http://hdl.handle.net/".to_string());

        let config = IngestConfig::resolve(Some(root.path()), Some(&db), &toml_config).unwrap();

        assert_eq!(config.archive_root, root.path());
        assert_eq!(config.database_path, db);
        assert_eq!(config.assetstore_dir, root.path().join("state").join("assetstore"));
        assert_eq!(config.handle_prefix, "123456789");
        assert_eq!(
            config.export_options(false, true).handle_uri_prefix.as_deref(),
            Some("http://hdl.handle.net/")
        );
    }

    #[test]
    #[serial]
    fn test_missing_archive_root_is_error() {
        std::env::remove_var(ARCHIVE_ROOT_ENV);
        let result = IngestConfig::resolve(None, None, &TomlConfig::default());
        assert!(result.is_err());
    }
}
