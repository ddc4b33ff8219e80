//! LMDB-backed [`OrderedIndex`].
//!
//! Dual-layer architecture:
//! - Base Layer: durable entries (LMDB)
//! - Delta Layer: mutations since the last flush (DashMap)
//!
//! Flushing applies the delta to LMDB in one write transaction while the
//! structure lock is held exclusively, so no point operation can observe
//! a half-applied delta.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;
use tsfs_config::log_index_debug;
use tsfs_shard::FsId;

use crate::{
    ExclusiveIndex, FsIdCodec, IndexError, LocationRecord, OrderedIndex, RecordCodec, Result,
};

/// Delta entry for in-memory modifications
#[derive(Debug, Clone, Copy)]
enum DeltaEntry {
    /// Modified or new entry
    Modified(LocationRecord),
    /// Deleted (whiteout)
    Deleted,
}

pub struct LmdbIndex {
    env: Env,
    records: Database<FsIdCodec, RecordCodec>,
    delta: DashMap<FsId, DeltaEntry>,
    /// Shared for point operations, exclusive for flush and GC
    structure: RwLock<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LmdbIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbIndex")
            .field("path", &self.env.path())
            .field("pending", &self.delta.len())
            .finish()
    }
}

impl LmdbIndex {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Maximum readers
    const MAX_READERS: u32 = 128;

    /// Open or create an index in the directory `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: one environment per shard directory. `FsId` admits no
        // path aliases, so each directory has a single registry cache key
        // and the allocator registry opens at most one index for it.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let records = env.create_database(&mut wtxn, Some("records"))?;
        wtxn.commit()?;

        debug!("Opened LMDB index at {:?}", path);

        Ok(Self {
            env,
            records,
            delta: DashMap::new(),
            structure: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of mutations not yet flushed to LMDB.
    pub fn pending(&self) -> usize {
        self.delta.len()
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, ()>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        self.structure.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn exclusive(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.structure.write().map_err(|_| IndexError::LockPoisoned)
    }

    fn base_get(&self, id: &FsId) -> Result<Option<LocationRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.get(&rtxn, id)?)
    }

    /// Read-modify-write of one key under its delta shard lock.
    ///
    /// `f` sees the current record and returns what to write (if anything)
    /// plus the caller's result.
    fn update<R, F>(&self, id: &FsId, f: F) -> Result<R>
    where
        F: FnOnce(Option<LocationRecord>) -> (Option<DeltaEntry>, R),
    {
        let _shared = self.shared()?;
        let entry = self.delta.entry(id.clone());
        let current = match &entry {
            Entry::Occupied(e) => match e.get() {
                DeltaEntry::Modified(record) => Some(*record),
                DeltaEntry::Deleted => None,
            },
            Entry::Vacant(_) => self.base_get(id)?,
        };
        let (write, result) = f(current);
        if let Some(write) = write {
            entry.insert(write);
        }
        Ok(result)
    }

    fn merged_entries(&self) -> Result<Vec<(FsId, LocationRecord)>> {
        let rtxn = self.env.read_txn()?;
        let mut merged = BTreeMap::new();
        for item in self.records.iter(&rtxn)? {
            let (id, record) = item?;
            merged.insert(id, record);
        }
        for entry in self.delta.iter() {
            match entry.value() {
                DeltaEntry::Modified(record) => {
                    merged.insert(entry.key().clone(), *record);
                }
                DeltaEntry::Deleted => {
                    merged.remove(entry.key());
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Apply the delta layer to LMDB. Caller holds the structure lock
    /// exclusively.
    fn commit_delta(&self) -> Result<()> {
        if self.delta.is_empty() {
            return Ok(());
        }

        let mut wtxn = self.env.write_txn()?;
        let mut applied = 0usize;
        for entry in self.delta.iter() {
            match entry.value() {
                DeltaEntry::Modified(record) => {
                    self.records.put(&mut wtxn, entry.key(), record)?;
                }
                DeltaEntry::Deleted => {
                    self.records.delete(&mut wtxn, entry.key())?;
                }
            }
            applied += 1;
        }
        wtxn.commit()?;
        self.delta.clear();

        log_index_debug!(applied, "Committed delta to LMDB");
        Ok(())
    }
}

impl OrderedIndex for LmdbIndex {
    type Exclusive<'a> = LmdbExclusive<'a>;

    fn find(&self, id: &FsId) -> Result<Option<LocationRecord>> {
        let _shared = self.shared()?;
        if let Some(delta) = self.delta.get(id) {
            return Ok(match *delta.value() {
                DeltaEntry::Modified(record) => Some(record),
                DeltaEntry::Deleted => None,
            });
        }
        self.base_get(id)
    }

    fn insert(&self, id: &FsId, record: LocationRecord) -> Result<()> {
        let _shared = self.shared()?;
        self.delta.insert(id.clone(), DeltaEntry::Modified(record));
        Ok(())
    }

    fn insert_if_absent(&self, id: &FsId, record: LocationRecord) -> Result<LocationRecord> {
        self.update(id, |current| match current {
            Some(existing) => (None, existing),
            None => (Some(DeltaEntry::Modified(record)), record),
        })
    }

    fn delete(&self, id: &FsId) -> Result<bool> {
        self.update(id, |current| match current {
            Some(_) => (Some(DeltaEntry::Deleted), true),
            None => (None, false),
        })
    }

    fn delete_if<F>(&self, id: &FsId, pred: F) -> Result<bool>
    where
        F: FnOnce(&LocationRecord) -> bool,
    {
        self.update(id, |current| match current {
            Some(record) if pred(&record) => (Some(DeltaEntry::Deleted), true),
            _ => (None, false),
        })
    }

    fn replace_if<F>(&self, id: &FsId, update: F) -> Result<bool>
    where
        F: FnOnce(&LocationRecord) -> Option<LocationRecord>,
    {
        self.update(id, |current| match current.as_ref().and_then(update) {
            Some(replacement) => (Some(DeltaEntry::Modified(replacement)), true),
            None => (None, false),
        })
    }

    fn entries(&self) -> Result<Vec<(FsId, LocationRecord)>> {
        let _shared = self.shared()?;
        self.merged_entries()
    }

    fn lock(&self) -> Result<LmdbExclusive<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(LmdbExclusive {
            index: self,
            _guard: self.exclusive()?,
        })
    }

    fn close(&self) -> Result<()> {
        let _guard = self.exclusive()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.commit_delta()?;
        self.env.force_sync()?;
        Ok(())
    }
}

/// Exclusive hold on an [`LmdbIndex`]; point operations block until drop.
pub struct LmdbExclusive<'a> {
    index: &'a LmdbIndex,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ExclusiveIndex for LmdbExclusive<'_> {
    fn entries(&self) -> Result<Vec<(FsId, LocationRecord)>> {
        self.index.merged_entries()
    }

    fn flush_pending(&mut self) -> Result<()> {
        self.index.commit_delta()
    }
}
