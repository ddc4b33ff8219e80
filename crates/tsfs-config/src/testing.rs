//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary data directory
//! - Additional filesystem roots for multi-root placement
//! - Small shard parameters so tests build real multi-level trees quickly
//!
//! # Usage
//!
//! ```ignore
//! use tsfs_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage.data_dir is isolated and removed on drop
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, RootConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Default data directory
    pub data_dir: PathBuf,
    /// Secondary root used by `with_extra_root`
    pub extra_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let data_dir = root.join("data");
        let extra_root = root.join("extra");
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&extra_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            data_dir,
            extra_root,
            test_id,
        })
    }

    /// Config pointing at this environment, with small shards.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.data_dir = self.data_dir.clone();
        cfg.shard.max_files_per_store = 64;
        cfg.shard.max_entries_per_dir = 8;
        cfg.lanes.lanes_per_container = 4;
        cfg.lanes.header_size = 16;
        cfg
    }

    /// Same as `config()` but identifier paths under `prefix` live on the
    /// extra root.
    pub fn config_with_extra_root(&self, prefix: &str) -> Config {
        let mut cfg = self.config();
        cfg.storage.roots.push(RootConfig {
            prefix: prefix.to_string(),
            dir: self.extra_root.clone(),
        });
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.data_dir.exists());
        assert!(env.extra_root.exists());
    }

    #[test]
    fn test_environment_ids_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.test_id, env2.test_id);
        assert_ne!(env1.data_dir, env2.data_dir);
    }

    #[test]
    fn test_config_is_valid() {
        let env = TestEnvironment::new().unwrap();
        env.config().validate().unwrap();
        let cfg = env.config_with_extra_root("/pa");
        assert_eq!(cfg.storage.roots.len(), 1);
        assert_eq!(cfg.storage.roots[0].dir, env.extra_root);
    }
}
