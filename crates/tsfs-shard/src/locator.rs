//! Placement of identifier paths onto filesystem roots.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tsfs_config::StorageConfig;

/// Resolves which filesystem root holds a given identifier path.
pub trait FileSystemLocator: Send + Sync {
    fn root_for(&self, id_path: &str) -> PathBuf;
    fn all_roots(&self) -> BTreeSet<PathBuf>;
}

/// Everything lives under one directory.
#[derive(Debug, Clone)]
pub struct SingleRootLocator {
    root: PathBuf,
}

impl SingleRootLocator {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl FileSystemLocator for SingleRootLocator {
    fn root_for(&self, _id_path: &str) -> PathBuf {
        self.root.clone()
    }

    fn all_roots(&self) -> BTreeSet<PathBuf> {
        BTreeSet::from([self.root.clone()])
    }
}

/// Routes identifier paths by longest matching prefix, falling back to a
/// default root.
#[derive(Debug, Clone)]
pub struct PrefixLocator {
    default_root: PathBuf,
    /// Sorted longest prefix first
    routes: Vec<(String, PathBuf)>,
}

impl PrefixLocator {
    pub fn new<P: AsRef<Path>>(default_root: P) -> Self {
        Self {
            default_root: default_root.as_ref().to_path_buf(),
            routes: Vec::new(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        let mut locator = Self::new(&storage.data_dir);
        for root in &storage.roots {
            locator = locator.route(&root.prefix, &root.dir);
        }
        locator
    }

    /// Place identifier paths under `prefix` on `root`.
    pub fn route<P: AsRef<Path>>(mut self, prefix: &str, root: P) -> Self {
        let prefix = prefix.trim_end_matches('/').to_string();
        self.routes.push((prefix, root.as_ref().to_path_buf()));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

impl FileSystemLocator for PrefixLocator {
    fn root_for(&self, id_path: &str) -> PathBuf {
        self.routes
            .iter()
            .find(|(prefix, _)| path_has_prefix(id_path, prefix))
            .map(|(_, root)| root.clone())
            .unwrap_or_else(|| self.default_root.clone())
    }

    fn all_roots(&self) -> BTreeSet<PathBuf> {
        let mut roots: BTreeSet<PathBuf> = self.routes.iter().map(|(_, r)| r.clone()).collect();
        roots.insert(self.default_root.clone());
        roots
    }
}
