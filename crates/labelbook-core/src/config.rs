use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LabelbookError, Result};

/// Top-level configuration for the Labelbook record store.
///
/// Loaded from `~/.labelbook/config.toml` by default. The binary owns the
/// value and hands it to the store at construction time; nothing in the
/// storage crate reads settings from globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelbookConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
}

impl LabelbookConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LabelbookConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LabelbookError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Resolved file layout under the configured data root.
    pub fn paths(&self) -> StorePaths {
        StorePaths::new(expand_home(&self.general.data_root))
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Application data root; all store files live below it.
    pub data_root: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_root: "~/.labelbook".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging so readers do not block the writer.
    pub wal: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

/// Search and paging defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size the command line uses when no limit is given.
    pub default_page_size: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
        }
    }
}

impl SearchConfig {
    /// Row limit for a listing: every row when `all` is set, otherwise the
    /// requested size or the configured default. Requested sizes are never
    /// adjusted.
    pub fn page_limit(&self, requested: Option<u64>, all: bool) -> Option<u64> {
        if all {
            None
        } else {
            Some(requested.unwrap_or(self.default_page_size))
        }
    }
}

/// Legacy migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Copy the text log to the archive and replace it with a marker.
    pub archive_text_log: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            archive_text_log: true,
        }
    }
}

/// Number of leading variant-number characters shared by related labels.
pub const DEFAULT_NOTES_PREFIX_LEN: usize = 6;

/// Label metadata settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    /// Variant-number prefix length used when syncing notes across labels.
    pub notes_prefix_len: usize,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            notes_prefix_len: DEFAULT_NOTES_PREFIX_LEN,
        }
    }
}

/// File layout of the record store, relative to the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Consolidated shipping log store.
    pub fn shipping_logs_db(&self) -> PathBuf {
        self.root
            .join("logs")
            .join("shipping_logs")
            .join("shipping_logs.db")
    }

    /// Label metadata store.
    pub fn labels_db(&self) -> PathBuf {
        self.root.join("database").join("labels.db")
    }

    /// Legacy single-table shipping database.
    pub fn legacy_shipping_db(&self) -> PathBuf {
        self.root.join("database").join("shipping_records.db")
    }

    /// Legacy flat-text shipping log.
    pub fn legacy_text_log(&self) -> PathBuf {
        self.root.join("logs").join("shipping_records.txt")
    }

    /// Where archived legacy text logs are copied.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("logs").join("archive")
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}
