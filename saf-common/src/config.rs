//! Configuration loading and archive root resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (database and assetstore only)
//!
//! The archive root has no compiled default and must be an existing directory.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the archive root
pub const ARCHIVE_ROOT_ENV: &str = "SAF_ARCHIVE_ROOT";

/// Environment variable overriding the database path
pub const DATABASE_ENV: &str = "SAF_DATABASE";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Directory all SAF source folders and registered paths live under
    #[serde(default)]
    pub archive_root: Option<PathBuf>,

    /// SQLite database used by the reference store
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Directory holding copied bitstream bytes
    #[serde(default)]
    pub assetstore_dir: Option<PathBuf>,

    /// Prefix for minted handles
    #[serde(default = "default_handle_prefix")]
    pub handle_prefix: String,

    /// URI prefix identifying handle-derived `dc.identifier.uri` values
    #[serde(default)]
    pub handle_uri_prefix: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_handle_prefix() -> String {
    "123456789".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            archive_root: None,
            database_path: None,
            assetstore_dir: None,
            handle_prefix: default_handle_prefix(),
            handle_uri_prefix: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Load configuration
    ///
    /// An explicit path must exist and parse. Without one, the platform
    /// config locations are tried and a missing file falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) => Self::from_file(&path),
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: TomlConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// First existing platform config file
///
/// Linux tries `~/.config/saf/config.toml`, then `/etc/saf/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("saf").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/saf/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the archive root (CLI > ENV > TOML) and check it is a directory
pub fn resolve_archive_root(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &TomlConfig,
) -> Result<PathBuf> {
    let root = if let Some(path) = cli_arg {
        path.to_path_buf()
    } else if let Ok(path) = std::env::var(env_var_name) {
        PathBuf::from(path)
    } else if let Some(path) = &config.archive_root {
        path.clone()
    } else {
        return Err(Error::Config(format!(
            "Archive root not configured (use --archive-root, {} or archive_root in config.toml)",
            env_var_name
        )));
    };

    if !root.is_dir() {
        return Err(Error::Config(format!(
            "Archive root {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// Resolve the database path (CLI > ENV > TOML > OS default)
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.database_path {
        return path.clone();
    }
    default_data_folder().join("saf.db")
}

/// Assetstore directory (TOML > next to the database)
pub fn resolve_assetstore_dir(config: &TomlConfig, database_path: &Path) -> PathBuf {
    if let Some(dir) = &config.assetstore_dir {
        return dir.clone();
    }
    database_path
        .parent()
        .map(|p| p.join("assetstore"))
        .unwrap_or_else(|| default_data_folder().join("assetstore"))
}

/// OS-dependent data folder
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/saf (or /var/lib/saf for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("saf"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/saf"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("saf"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/saf"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("saf"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\saf"))
    } else {
        PathBuf::from("./saf_data")
    }
}
