//! Per-path shard lifecycle: create, persist, reload, recover, enumerate.
//!
//! Each shard is described by a small properties file in its root. The
//! `OK=true` line is written last, after the parameters have been synced,
//! so an entry without it is a torn write and is rebuilt.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};
use tsfs_config::{log_registry_info, log_registry_warn, Config};
use walkdir::WalkDir;

use crate::{
    DirectoryShard, FileSystemLocator, FsId, IdFilter, PathMatch, PrefixLocator, Result,
    ShardError, BIN_DIR_PREFIX,
};

/// Registry entry file name inside every shard root
pub const ENTRY_FILE: &str = "shard.properties";

/// Data-type segment between a filesystem root and identifier paths
pub const DATA_TYPE_DIR: &str = "data";

const KEY_BIN_COUNT: &str = "bin_count";
const KEY_LEVEL_COUNT: &str = "level_count";
const KEY_MAX_ENTRIES: &str = "max_entries_per_dir";
const KEY_OK: &str = "OK";

/// Parameters read back from a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryParams {
    bin_count: u64,
    level_count: u32,
    max_entries_per_dir: u32,
}

/// Creates and caches one [`DirectoryShard`] per identifier path.
pub struct ShardRegistry {
    locator: Arc<dyn FileSystemLocator>,
    /// `(max_files_per_store, max_entries_per_dir)`; `None` when read-only
    create_params: Option<(u64, u32)>,
    cache: Mutex<HashMap<String, Arc<DirectoryShard>>>,
}

impl std::fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRegistry")
            .field("roots", &self.locator.all_roots())
            .field("create_params", &self.create_params)
            .finish()
    }
}

impl ShardRegistry {
    /// A registry that only opens existing shards.
    pub fn read_only(locator: Arc<dyn FileSystemLocator>) -> Self {
        Self {
            locator,
            create_params: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A registry that creates missing shards with the given sizing.
    pub fn new(
        locator: Arc<dyn FileSystemLocator>,
        max_files_per_store: u64,
        max_entries_per_dir: u32,
    ) -> Self {
        Self {
            locator,
            create_params: Some((max_files_per_store, max_entries_per_dir)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Read-write registry placed with a [`PrefixLocator`] built from
    /// `[storage]` and sized from `[shard]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(PrefixLocator::from_config(&config.storage)),
            config.shard.max_files_per_store,
            config.shard.max_entries_per_dir,
        )
    }

    pub fn is_read_only(&self) -> bool {
        self.create_params.is_none()
    }

    pub fn locator(&self) -> &Arc<dyn FileSystemLocator> {
        &self.locator
    }

    /// Directory holding the shard for an identifier path.
    pub fn shard_dir(&self, id_path: &str) -> Result<PathBuf> {
        FsId::for_path(id_path)?;
        let relative = id_path.trim_start_matches('/');
        if relative.is_empty() {
            return Err(ShardError::InvalidId(
                "the root path cannot hold a shard".into(),
            ));
        }
        Ok(self
            .locator
            .root_for(id_path)
            .join(DATA_TYPE_DIR)
            .join(relative))
    }

    /// Resolve the shard responsible for `id`'s path.
    ///
    /// Returns `None` when no entry exists and `create` is false. An
    /// existing shard is checked for missing bins; they are recreated only
    /// when `recover` is set, otherwise just reported.
    #[instrument(level = "debug", skip(self), fields(path = %id.path()))]
    pub fn find(
        &self,
        id: &FsId,
        create: bool,
        recover: bool,
    ) -> Result<Option<Arc<DirectoryShard>>> {
        if create && self.is_read_only() {
            return Err(ShardError::ReadOnly(id.path().to_string()));
        }

        let mut cache = self.cache.lock().map_err(|_| ShardError::LockPoisoned)?;
        if let Some(shard) = cache.get(id.path()) {
            return Ok(Some(Arc::clone(shard)));
        }

        let dir = self.shard_dir(id.path())?;
        let entry = dir.join(ENTRY_FILE);
        let entry_exists = entry.exists();
        if !entry_exists && !create {
            return Ok(None);
        }

        let shard = match read_entry(&entry)? {
            Some(params) => {
                let shard = DirectoryShard::load(
                    &dir,
                    params.bin_count,
                    params.level_count,
                    params.max_entries_per_dir,
                );
                shard.recover(!recover)?;
                debug!(bin_count = params.bin_count, "Loaded shard");
                shard
            }
            None => {
                let (max_files, max_entries) = self
                    .create_params
                    .ok_or_else(|| ShardError::ReadOnly(id.path().to_string()))?;
                if entry_exists {
                    log_registry_warn!(
                        entry = %entry.display(),
                        "Registry entry is incomplete, overwriting with a new shard"
                    );
                }
                let shard = DirectoryShard::create(max_files, max_entries, &dir)?;
                write_entry(&entry, &shard)?;
                log_registry_info!(
                    path = %id.path(),
                    bin_count = shard.bin_count(),
                    "Created shard"
                );
                shard
            }
        };

        let shard = Arc::new(shard);
        cache.insert(id.path().to_string(), Arc::clone(&shard));
        Ok(Some(shard))
    }

    /// Forget the shard and remove everything it stored.
    ///
    /// The shard root itself is removed only if nothing else is left in it.
    pub fn delete_shard(&self, shard: &DirectoryShard) -> Result<()> {
        {
            let mut cache = self.cache.lock().map_err(|_| ShardError::LockPoisoned)?;
            cache.retain(|_, cached| cached.root() != shard.root());
        }

        shard.delete()?;
        match fs::remove_file(shard.root().join(ENTRY_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if is_empty_dir(shard.root())? {
            fs::remove_dir(shard.root())?;
        }
        Ok(())
    }

    /// Identifier paths holding a valid shard that match `filter`.
    ///
    /// Each path is reported as an identifier with the placeholder name.
    pub fn find_paths(&self, filter: &dyn IdFilter) -> Result<BTreeSet<FsId>> {
        let mut found = BTreeSet::new();
        self.walk_entries(filter, |id_path, _dir, _params| {
            insert_unique(&mut found, FsId::for_path(id_path)?)
        })?;
        Ok(found)
    }

    /// Every identifier stored in any shard, across all roots, that matches
    /// `filter`.
    pub fn find_ids(&self, filter: &dyn IdFilter) -> Result<BTreeSet<FsId>> {
        let mut found = BTreeSet::new();
        self.walk_entries(filter, |id_path, dir, params| {
            let shard = DirectoryShard::load(
                dir,
                params.bin_count,
                params.level_count,
                params.max_entries_per_dir,
            );
            for name in shard.list_all_ids()? {
                let id = match FsId::new(id_path, name.as_str()) {
                    Ok(id) => id,
                    Err(e) => {
                        log_registry_warn!(
                            dir = %dir.display(),
                            error = %e,
                            "Skipping unexpected file"
                        );
                        continue;
                    }
                };
                if filter.matches(&id) {
                    insert_unique(&mut found, id)?;
                }
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Drop every cached shard.
    pub fn clear(&self) -> Result<()> {
        let mut cache = self.cache.lock().map_err(|_| ShardError::LockPoisoned)?;
        cache.clear();
        Ok(())
    }

    /// Visit every directory with a valid entry whose path completely
    /// matches `filter`, pruning bin directories and non-matching subtrees.
    fn walk_entries<F>(&self, filter: &dyn IdFilter, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &Path, EntryParams) -> Result<()>,
    {
        for root in self.locator.all_roots() {
            let base = root.join(DATA_TYPE_DIR);
            if !base.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&base)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    if !e.file_type().is_dir() {
                        return false;
                    }
                    if e.depth() == 0 {
                        return true;
                    }
                    if e.file_name().to_string_lossy().starts_with(BIN_DIR_PREFIX) {
                        return false;
                    }
                    match id_path_of(&base, e.path()) {
                        Some(p) => filter.match_path(&p) != PathMatch::NoMatch,
                        None => false,
                    }
                });

            for entry in walker {
                let entry = entry.map_err(io::Error::from)?;
                if entry.depth() == 0 {
                    continue;
                }
                let Some(id_path) = id_path_of(&base, entry.path()) else {
                    continue;
                };
                if filter.match_path(&id_path) != PathMatch::Complete {
                    continue;
                }
                if let Some(params) = read_entry(&entry.path().join(ENTRY_FILE))? {
                    visit(&id_path, entry.path(), params)?;
                }
            }
        }
        Ok(())
    }
}

fn insert_unique(set: &mut BTreeSet<FsId>, id: FsId) -> Result<()> {
    if set.contains(&id) {
        return Err(ShardError::DuplicateId(id));
    }
    set.insert(id);
    Ok(())
}

/// `/a/b` for `<base>/a/b`; `None` for non UTF-8 components.
fn id_path_of(base: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(base).ok()?;
    let mut id_path = String::new();
    for component in relative.components() {
        id_path.push('/');
        id_path.push_str(component.as_os_str().to_str()?);
    }
    if id_path.is_empty() {
        id_path.push('/');
    }
    Some(id_path)
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// `Ok(None)` for a missing or torn entry; `Corrupted` when the sentinel is
/// present but the parameters are unusable.
fn read_entry(path: &Path) -> Result<Option<EntryParams>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim(), value.trim());
        }
    }
    if props.get(KEY_OK) != Some(&"true") {
        return Ok(None);
    }

    let corrupted = |reason: String| ShardError::Corrupted {
        path: path.to_path_buf(),
        reason,
    };
    let field = |key: &str| -> Result<u64> {
        props
            .get(key)
            .ok_or_else(|| corrupted(format!("missing {}", key)))?
            .parse::<u64>()
            .map_err(|e| corrupted(format!("bad {}: {}", key, e)))
    };

    let bin_count = field(KEY_BIN_COUNT)?;
    let level_count = u32::try_from(field(KEY_LEVEL_COUNT)?)
        .map_err(|_| corrupted("level_count out of range".into()))?;
    let max_entries_per_dir = u32::try_from(field(KEY_MAX_ENTRIES)?)
        .map_err(|_| corrupted("max_entries_per_dir out of range".into()))?;
    if bin_count < 1 || max_entries_per_dir < 2 {
        return Err(corrupted("parameters out of range".into()));
    }

    Ok(Some(EntryParams {
        bin_count,
        level_count,
        max_entries_per_dir,
    }))
}

fn write_entry(path: &Path, shard: &DirectoryShard) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{}={}", KEY_BIN_COUNT, shard.bin_count())?;
    writeln!(file, "{}={}", KEY_LEVEL_COUNT, shard.level_count())?;
    writeln!(file, "{}={}", KEY_MAX_ENTRIES, shard.max_entries_per_dir())?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{}=true", KEY_OK)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PathQuery, SingleRootLocator};
    use tempfile::TempDir;

    fn registry(root: &Path) -> ShardRegistry {
        ShardRegistry::new(Arc::new(SingleRootLocator::new(root)), 100, 10)
    }

    fn id(s: &str) -> FsId {
        s.parse().unwrap()
    }

    #[test]
    fn test_find_without_create_returns_none() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        assert!(reg.find(&id("/pa/x"), false, false).unwrap().is_none());
    }

    #[test]
    fn test_find_creates_and_persists() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        let shard = reg.find(&id("/pa/pdc/x"), true, false).unwrap().unwrap();
        assert_eq!(shard.root(), temp.path().join("data/pa/pdc"));
        assert_eq!(shard.bin_count(), 11);

        let text = fs::read_to_string(shard.root().join(ENTRY_FILE)).unwrap();
        assert!(text.ends_with("OK=true\n"));

        // cached
        let again = reg.find(&id("/pa/pdc/y"), false, false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&shard, &again));

        // a fresh registry reloads the persisted parameters
        let other = ShardRegistry::read_only(Arc::new(SingleRootLocator::new(temp.path())));
        let loaded = other.find(&id("/pa/pdc/z"), false, false).unwrap().unwrap();
        assert_eq!(loaded.bin_count(), shard.bin_count());
        assert_eq!(loaded.level_count(), shard.level_count());
        assert_eq!(loaded.max_entries_per_dir(), 10);
    }

    #[test]
    fn test_read_only_refuses_create() {
        let temp = TempDir::new().unwrap();
        let reg = ShardRegistry::read_only(Arc::new(SingleRootLocator::new(temp.path())));
        assert!(matches!(
            reg.find(&id("/pa/x"), true, false),
            Err(ShardError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_root_path_rejected() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        assert!(matches!(
            reg.find(&id("/x"), true, false),
            Err(ShardError::InvalidId(_))
        ));
    }

    #[test]
    fn test_shard_dir_is_one_to_one() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        assert_eq!(reg.shard_dir("/pa/pdc").unwrap(), temp.path().join("data/pa/pdc"));

        for alias in ["/pa//pdc", "/pa/./pdc", "/pa/x/../pdc", "/../../escaped", "/pa/hd-0"] {
            assert!(
                matches!(reg.shard_dir(alias), Err(ShardError::InvalidId(_))),
                "{} accepted",
                alias
            );
        }
    }

    #[test]
    fn test_nested_shard_cannot_hide_in_bins() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        let parent = reg.find(&id("/pa/x"), true, false).unwrap().unwrap();
        assert!(FsId::new("/pa/hd-0", "y").is_err());

        // Every shard the registry creates stays visible to enumeration
        reg.find(&id("/pa/sub/y"), true, false).unwrap();
        let paths = reg.find_paths(&PathQuery::under("/")).unwrap();
        assert_eq!(paths.len(), 2);

        reg.delete_shard(&parent).unwrap();
        assert!(!parent.root().join("hd-0").exists());
        assert!(reg.find(&id("/pa/sub/y"), false, false).unwrap().is_some());
    }

    #[test]
    fn test_torn_entry_is_rebuilt() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data/pa");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_FILE), "bin_count=7\nlevel_count=0\n").unwrap();

        let reg = registry(temp.path());
        let shard = reg.find(&id("/pa/x"), true, false).unwrap().unwrap();
        assert_eq!(shard.bin_count(), 11);
        assert!(fs::read_to_string(dir.join(ENTRY_FILE))
            .unwrap()
            .contains("OK=true"));
    }

    #[test]
    fn test_corrupted_entry_is_an_error() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data/pa");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_FILE), "bin_count=seven\nOK=true\n").unwrap();

        let reg = registry(temp.path());
        assert!(matches!(
            reg.find(&id("/pa/x"), false, false),
            Err(ShardError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_find_recovers_missing_bins_on_request() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        let shard = reg.find(&id("/pa/x"), true, false).unwrap().unwrap();
        let victim = shard.dir_for_bin(3);
        fs::remove_dir_all(&victim).unwrap();

        reg.clear().unwrap();
        reg.find(&id("/pa/x"), false, false).unwrap().unwrap();
        assert!(!victim.exists());

        reg.clear().unwrap();
        reg.find(&id("/pa/x"), false, true).unwrap().unwrap();
        assert!(victim.is_dir());
    }

    #[test]
    fn test_delete_shard() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        let shard = reg.find(&id("/pa/x"), true, false).unwrap().unwrap();
        fs::write(shard.path_for_id("x"), b"x").unwrap();

        reg.delete_shard(&shard).unwrap();
        assert!(!shard.root().exists());
        assert!(reg.find(&id("/pa/x"), false, false).unwrap().is_none());
    }

    #[test]
    fn test_delete_shard_keeps_nonempty_root() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        let shard = reg.find(&id("/pa/x"), true, false).unwrap().unwrap();
        reg.find(&id("/pa/sub/x"), true, false).unwrap().unwrap();

        reg.delete_shard(&shard).unwrap();
        assert!(shard.root().is_dir());
        assert!(!shard.root().join(ENTRY_FILE).exists());
        assert!(reg.find(&id("/pa/sub/x"), false, false).unwrap().is_some());
    }

    #[test]
    fn test_find_paths_and_ids() {
        let temp = TempDir::new().unwrap();
        let reg = registry(temp.path());
        for path in ["/pa/pdc", "/pa/cal", "/pb"] {
            let shard = reg.find(&FsId::for_path(path).unwrap(), true, false).unwrap().unwrap();
            for name in ["kic1", "kic2"] {
                fs::write(shard.path_for_id(name), b"").unwrap();
            }
        }

        let paths = reg.find_paths(&PathQuery::under("/pa")).unwrap();
        let paths: Vec<String> = paths.iter().map(|p| p.path().to_string()).collect();
        assert_eq!(paths, vec!["/pa/cal", "/pa/pdc"]);

        let ids = reg
            .find_ids(&PathQuery::exact("/pa/pdc").with_names("*2"))
            .unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![id("/pa/pdc/kic2")]);

        assert_eq!(reg.find_ids(&PathQuery::under("/")).unwrap().len(), 6);
    }
}
