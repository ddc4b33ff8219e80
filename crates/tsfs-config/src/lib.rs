//! # tsfs-config
//!
//! Configuration management for the time series file store.
//!
//! Loads configuration from:
//! 1. `~/.tsfs/config.toml` (global)
//! 2. `.tsfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully written Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub shard: ShardConfig,
    pub lanes: LaneConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.tsfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_file(&global_path)?;
            }
        }

        // 2. Load project config (.tsfs/config.toml) - overrides global
        let project_path = Path::new(".tsfs/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::load_file(project_path)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Parse a single TOML file without merging or env overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.tsfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tsfs/config.toml"))
    }

    /// Merge another config (project overrides)
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.data_dir != defaults.storage.data_dir {
            self.storage.data_dir = other.storage.data_dir;
        }
        if !other.storage.roots.is_empty() {
            self.storage.roots = other.storage.roots;
        }
        if other.shard.max_files_per_store != defaults.shard.max_files_per_store {
            self.shard.max_files_per_store = other.shard.max_files_per_store;
        }
        if other.shard.max_entries_per_dir != defaults.shard.max_entries_per_dir {
            self.shard.max_entries_per_dir = other.shard.max_entries_per_dir;
        }
        if other.lanes.lanes_per_container != defaults.lanes.lanes_per_container {
            self.lanes.lanes_per_container = other.lanes.lanes_per_container;
        }
        if other.lanes.header_size != defaults.lanes.header_size {
            self.lanes.header_size = other.lanes.header_size;
        }
        if other.lanes.flush_every != defaults.lanes.flush_every {
            self.lanes.flush_every = other.lanes.flush_every;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TSFS_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(path);
        }
        if let Ok(n) = std::env::var("TSFS_MAX_ENTRIES_PER_DIR") {
            if let Ok(n) = n.parse() {
                self.shard.max_entries_per_dir = n;
            }
        }
        if let Ok(n) = std::env::var("TSFS_MAX_FILES_PER_STORE") {
            if let Ok(n) = n.parse() {
                self.shard.max_files_per_store = n;
            }
        }
    }

    /// Reject values the storage layer cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard.max_files_per_store < 1 {
            return Err(ConfigError::Invalid(
                "shard.max_files_per_store must be at least 1".into(),
            ));
        }
        if self.shard.max_entries_per_dir < 2 {
            return Err(ConfigError::Invalid(
                "shard.max_entries_per_dir must be at least 2".into(),
            ));
        }
        if !(1..=256).contains(&self.lanes.lanes_per_container) {
            return Err(ConfigError::Invalid(format!(
                "lanes.lanes_per_container must be in 1..=256, got {}",
                self.lanes.lanes_per_container
            )));
        }
        if self.lanes.flush_every == 0 {
            return Err(ConfigError::Invalid("lanes.flush_every must be non-zero".into()));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Default filesystem root for all identifier paths
    pub data_dir: PathBuf,
    /// Additional roots keyed by identifier-path prefix
    pub roots: Vec<RootConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::home_dir()
                .map(|h| h.join(".tsfs/data"))
                .unwrap_or_else(|| PathBuf::from(".tsfs/data")),
            roots: Vec::new(),
        }
    }
}

/// Places every identifier whose path starts with `prefix` under `dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    pub prefix: String,
    pub dir: PathBuf,
}

/// Directory sharding parameters used when a new shard is created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Expected number of files a single shard must hold
    pub max_files_per_store: u64,
    /// Upper bound on entries in any one directory
    pub max_entries_per_dir: u32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            max_files_per_store: 65_536,
            max_entries_per_dir: 1_024,
        }
    }
}

/// Container file geometry and flush batching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    /// Number of lanes sharing one container file
    pub lanes_per_container: u32,
    /// Bytes reserved at the start of each container file
    pub header_size: u64,
    /// Index mutations between forced flushes
    pub flush_every: u64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            lanes_per_container: 64,
            header_size: 0,
            flush_every: 64,
        }
    }
}
