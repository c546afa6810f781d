//! Sync engine configuration (`sync:` section of `.docsync/config.yaml`).

use crate::embeddings::EmbeddingConfig;
use crate::fragment::FragmenterConfig;
use docsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key of the engine section inside the shared config file.
const SECTION: &str = "sync";

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub fragmenter: FragmenterConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub lock: LockConfig,

    /// Files reprocessed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fragmenter: FragmenterConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            scan: ScanConfig::default(),
            lock: LockConfig::default(),
            concurrency: default_concurrency(),
        }
    }
}

impl SyncConfig {
    /// Reject configurations that would fail or loop at run time.
    pub fn validate(&self) -> AppResult<()> {
        self.fragmenter.validate()?;
        self.embedding.validate()?;
        self.store.validate()?;

        if self.concurrency == 0 {
            return Err(AppError::Config(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Vector store backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend name: "sqlite" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Database file, relative paths resolve against the workspace
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Fragments per upsert call and ids per delete call
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,

    /// Entries per index state page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Time limit for a single store call
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from(docsync_core::config::STATE_DIR).join("index.sqlite")
}

fn default_write_batch_size() -> usize {
    100
}

fn default_page_size() -> usize {
    500
}

fn default_store_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            write_batch_size: default_write_batch_size(),
            page_size: default_page_size(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !matches!(self.backend.as_str(), "sqlite" | "memory") {
            return Err(AppError::Config(format!(
                "Unknown store backend: '{}'. Supported backends: sqlite, memory",
                self.backend
            )));
        }

        if self.write_batch_size == 0 || self.page_size == 0 {
            return Err(AppError::Config(
                "store.write_batch_size and store.page_size must be greater than 0".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(AppError::Config(
                "store.timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Database location for a workspace.
    pub fn resolve_path(&self, workspace: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            workspace.join(&self.path)
        }
    }
}

/// Which files the scanner picks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Lowercase extensions without the dot; empty accepts every file
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names skipped anywhere in the tree
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Skip entries whose name starts with a dot
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,

    #[serde(default)]
    pub follow_links: bool,

    /// Compare paths case-insensitively
    #[serde(default)]
    pub case_insensitive: bool,
}

fn default_extensions() -> Vec<String> {
    ["txt", "md", "markdown", "rst", "html", "htm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude() -> Vec<String> {
    [".git", ".docsync", "node_modules", "target"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_skip_hidden() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude: default_exclude(),
            skip_hidden: default_skip_hidden(),
            follow_links: false,
            case_insensitive: false,
        }
    }
}

/// Run lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Heartbeat age after which a leftover lock is taken over
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    3600
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Load the `sync:` section from a config file.
///
/// A missing file or a file without the section yields the defaults.
pub fn load_config(path: &Path) -> AppResult<SyncConfig> {
    if !path.exists() {
        tracing::debug!("No config file at {:?}, using default sync config", path);
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("Failed to read config at {:?}: {}", path, e))
    })?;

    let document: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse config at {:?}: {}", path, e)))?;

    let config = match document.get(SECTION) {
        Some(section) if !section.is_null() => serde_yaml::from_value(section.clone())
            .map_err(|e| {
                AppError::Config(format!("Invalid '{}' section in {:?}: {}", SECTION, path, e))
            })?,
        _ => SyncConfig::default(),
    };

    tracing::debug!("Loaded sync config from {:?}", path);
    Ok(config)
}

/// Write the `sync:` section, keeping every other section of the file.
pub fn save_config(path: &Path, config: &SyncConfig) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let mut document = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str::<serde_yaml::Value>(&content)?
    } else {
        serde_yaml::Value::Mapping(Default::default())
    };

    let mapping = match document.as_mapping_mut() {
        Some(mapping) => mapping,
        None => {
            return Err(AppError::Config(format!(
                "Config at {:?} is not a YAML mapping",
                path
            )))
        }
    };
    mapping.insert(
        serde_yaml::Value::String(SECTION.to_string()),
        serde_yaml::to_value(config)?,
    );

    let yaml = serde_yaml::to_string(&document)?;
    fs::write(path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", path, e))
    })?;

    tracing::debug!("Saved sync config to {:?}", path);
    Ok(())
}
