//! Allocation, commit, rollback and garbage collection of identifier
//! storage within one shard.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument};
use tsfs_config::{log_alloc_debug, log_alloc_info, log_gc_error, log_gc_info, LaneConfig};
use tsfs_index::{ExclusiveIndex, LaneRef, LmdbIndex, LocationRecord, OrderedIndex};
use tsfs_shard::{DirectoryShard, FsId};

use crate::{AllocError, LaneAddressSpace, LaneAllocator, Result, StorageHandle};

/// Index directory inside the shard root
pub const INDEX_DIR: &str = "fsid.lmdb";

/// Index file left by the previous on-disk format
pub const LEGACY_INDEX_FILE: &str = "fsid.btree";

pub const DATA_SEQUENCE_FILE: &str = "data.seq";
pub const META_SEQUENCE_FILE: &str = "meta.seq";

/// Which stream a container holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Data,
    Meta,
}

impl ContainerKind {
    fn prefix(self) -> &'static str {
        match self {
            ContainerKind::Data => "d-",
            ContainerKind::Meta => "m-",
        }
    }
}

/// Shard-level name of a container file, e.g. `d-17`.
pub fn container_name(kind: ContainerKind, file_id: u32) -> String {
    format!("{}{}", kind.prefix(), file_id)
}

/// Inverse of [`container_name`]; `None` for anything else.
pub fn parse_container_name(name: &str) -> Option<(ContainerKind, u32)> {
    [ContainerKind::Data, ContainerKind::Meta]
        .into_iter()
        .find_map(|kind| {
            let digits = name.strip_prefix(kind.prefix())?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok().map(|id| (kind, id))
        })
}

/// Outcome of one garbage collection sweep
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub shard_root: PathBuf,
    /// Container files found on disk
    pub scanned: usize,
    /// Distinct containers referenced by some record
    pub referenced: usize,
    pub deleted: Vec<String>,
    /// Unreferenced containers that could not be removed
    pub failed: Vec<String>,
    pub bytes_freed: u64,
}

/// Storage allocator for the identifiers of one shard.
///
/// Safe to share between threads. Callers must not serialize calls behind
/// a lock of their own: point operations rely on the index's per-key
/// locking, and only flush and garbage collection take the index
/// exclusively.
pub struct StorageAllocator<I: OrderedIndex = LmdbIndex> {
    shard: Arc<DirectoryShard>,
    index: I,
    data_lanes: LaneAllocator,
    meta_lanes: LaneAllocator,
    lanes_per_container: u32,
    header_size: u64,
    flush_every: u64,
    mutations: AtomicU64,
}

impl<I: OrderedIndex> fmt::Debug for StorageAllocator<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAllocator")
            .field("root", &self.shard.root())
            .field("lanes_per_container", &self.lanes_per_container)
            .field("mutations", &self.mutations.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageAllocator<LmdbIndex> {
    /// Open the allocator living in `shard`'s root.
    ///
    /// Fails with [`AllocError::UnconvertedIndex`] when only a legacy index
    /// is present.
    pub fn open(shard: Arc<DirectoryShard>, lanes: &LaneConfig) -> Result<Self> {
        let legacy = shard.root().join(LEGACY_INDEX_FILE);
        let index_dir = shard.root().join(INDEX_DIR);
        if legacy.exists() && !index_dir.exists() {
            return Err(AllocError::UnconvertedIndex(legacy));
        }
        let index = LmdbIndex::open(&index_dir)?;
        Self::with_index(shard, index, lanes)
    }
}

impl<I: OrderedIndex> StorageAllocator<I> {
    pub fn with_index(shard: Arc<DirectoryShard>, index: I, lanes: &LaneConfig) -> Result<Self> {
        if lanes.flush_every == 0 {
            return Err(AllocError::InvalidConfig("flush_every must be positive".into()));
        }
        let data_lanes =
            LaneAllocator::open(shard.root().join(DATA_SEQUENCE_FILE), lanes.lanes_per_container)?;
        let meta_lanes =
            LaneAllocator::open(shard.root().join(META_SEQUENCE_FILE), lanes.lanes_per_container)?;

        debug!(root = %shard.root().display(), "Opened storage allocator");
        Ok(Self {
            shard,
            index,
            data_lanes,
            meta_lanes,
            lanes_per_container: lanes.lanes_per_container,
            header_size: lanes.header_size,
            flush_every: lanes.flush_every,
            mutations: AtomicU64::new(0),
        })
    }

    pub fn shard(&self) -> &Arc<DirectoryShard> {
        &self.shard
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Path of a container file, placed by the shard.
    pub fn container_path(&self, kind: ContainerKind, file_id: u32) -> PathBuf {
        self.shard.path_for_id(&container_name(kind, file_id))
    }

    fn lane_space(&self, kind: ContainerKind, lane: LaneRef) -> LaneAddressSpace {
        LaneAddressSpace::new(
            lane.lane,
            self.header_size,
            self.lanes_per_container,
            lane.file_id,
            self.container_path(kind, lane.file_id),
        )
    }

    fn handle(&self, id: FsId, record: LocationRecord) -> Result<StorageHandle<'_, I>> {
        let (data, meta) = record.lanes().ok_or_else(|| AllocError::NoStorage(id.clone()))?;
        let data = self.lane_space(ContainerKind::Data, data);
        let meta = self.lane_space(ContainerKind::Meta, meta);
        Ok(StorageHandle::new(self, id, data, meta))
    }

    /// Storage for `id`, allocating a provisional lane pair when absent and
    /// `create` is set.
    ///
    /// Two threads racing on the same identifier both draw lanes; the
    /// loser's lanes stay unreferenced until garbage collection.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub fn allocate_or_fetch(
        &self,
        id: &FsId,
        create: bool,
    ) -> Result<Option<StorageHandle<'_, I>>> {
        if let Some(record) = self.index.find(id)? {
            return self.handle(id.clone(), record).map(Some);
        }
        if !create {
            return Ok(None);
        }

        let data = self.data_lanes.next()?;
        let meta = self.meta_lanes.next()?;
        let mine = LocationRecord::provisional(data, meta);
        let winner = self.index.insert_if_absent(id, mine)?;
        if winner == mine {
            self.signal_mutation()?;
        } else {
            log_alloc_debug!(
                id = %id,
                data_file = data.file_id,
                data_lane = data.lane,
                "Lost allocation race, lanes left for collection"
            );
        }
        self.handle(id.clone(), winner).map(Some)
    }

    /// Commit every provisional record among `ids`. Unknown identifiers are
    /// ignored.
    pub fn mark_persistent(&self, ids: &[FsId]) -> Result<()> {
        let mut sorted: Vec<&FsId> = ids.iter().collect();
        sorted.sort();
        for id in sorted {
            let committed = self
                .index
                .replace_if(id, |r| r.is_provisional().then(|| r.with_committed(true)))?;
            if committed {
                self.signal_mutation()?;
            }
        }
        Ok(())
    }

    /// Delete provisional records among `ids`, or every provisional record
    /// when `ids` is `None`. Records committed in the meantime survive.
    /// Always flushes. Returns how many records were removed.
    pub fn rollback(&self, ids: Option<&[FsId]>) -> Result<usize> {
        let targets: Vec<FsId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.all_provisional_ids()?.into_iter().collect(),
        };

        let mut removed = 0;
        for id in &targets {
            if self.index.delete_if(id, |r| r.is_provisional())? {
                removed += 1;
                self.signal_mutation()?;
            }
        }
        self.flush_pending()?;

        if removed > 0 {
            log_alloc_info!(
                removed,
                root = %self.shard.root().display(),
                "Rolled back provisional records"
            );
        }
        Ok(removed)
    }

    /// Set whether `id` is provisional.
    pub fn set_provisional(&self, id: &FsId, provisional: bool) -> Result<()> {
        let replaced = self
            .index
            .replace_if(id, |r| Some(r.with_committed(!provisional)))?;
        if !replaced {
            return Err(AllocError::UnknownId(id.clone()));
        }
        self.signal_mutation()
    }

    /// Forget `id`. Its lanes are reclaimed by garbage collection.
    pub fn remove(&self, id: &FsId) -> Result<bool> {
        let removed = self.index.delete(id)?;
        if removed {
            self.signal_mutation()?;
        }
        Ok(removed)
    }

    pub fn exists(&self, id: &FsId) -> Result<bool> {
        Ok(self.index.find(id)?.is_some())
    }

    pub fn is_provisional(&self, id: &FsId) -> Result<bool> {
        match self.index.find(id)? {
            Some(record) => Ok(record.is_provisional()),
            None => Err(AllocError::UnknownId(id.clone())),
        }
    }

    pub fn all_ids(&self) -> Result<BTreeSet<FsId>> {
        Ok(self.index.entries()?.into_iter().map(|(id, _)| id).collect())
    }

    pub fn all_provisional_ids(&self) -> Result<BTreeSet<FsId>> {
        self.ids_where(LocationRecord::is_provisional)
    }

    pub fn all_committed_ids(&self) -> Result<BTreeSet<FsId>> {
        self.ids_where(LocationRecord::is_committed)
    }

    fn ids_where(&self, pred: fn(&LocationRecord) -> bool) -> Result<BTreeSet<FsId>> {
        Ok(self
            .index
            .entries()?
            .into_iter()
            .filter(|(_, r)| pred(r))
            .map(|(id, _)| id)
            .collect())
    }

    /// Count a mutation, flushing on every `flush_every`-th one.
    ///
    /// The counter belongs to this allocator, so the bound on unflushed
    /// mutations holds per index rather than across the process.
    fn signal_mutation(&self) -> Result<()> {
        let n = self.mutations.fetch_add(1, Ordering::AcqRel) + 1;
        if n % self.flush_every == 0 {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Make all index mutations durable, holding the index exclusively.
    pub fn flush_pending(&self) -> Result<()> {
        let mut exclusive = self.index.lock()?;
        exclusive.flush_pending()?;
        Ok(())
    }

    /// Delete every container file no record refers to.
    ///
    /// Holds the index exclusively for the whole sweep. A file that cannot
    /// be deleted is logged and skipped.
    #[instrument(level = "debug", skip(self), fields(root = %self.shard.root().display()))]
    pub fn garbage_collect(&self) -> Result<GcReport> {
        let exclusive = self.index.lock()?;

        let mut referenced = HashSet::new();
        for (_, record) in exclusive.entries()? {
            if let Some((data, meta)) = record.lanes() {
                referenced.insert((ContainerKind::Data, data.file_id));
                referenced.insert((ContainerKind::Meta, meta.file_id));
            }
        }

        let mut report = GcReport {
            shard_root: self.shard.root().to_path_buf(),
            referenced: referenced.len(),
            ..GcReport::default()
        };

        let listed = self.shard.list_all_ids()?;
        self.sweep(listed, &referenced, &mut report);

        drop(exclusive);
        Ok(report)
    }

    /// Remove every listed container absent from `referenced`, recording
    /// each outcome in `report`. Must run under the exclusive index lock.
    fn sweep<N>(
        &self,
        listed: N,
        referenced: &HashSet<(ContainerKind, u32)>,
        report: &mut GcReport,
    ) where
        N: IntoIterator<Item = String>,
    {
        for name in listed {
            let Some(container) = parse_container_name(&name) else {
                continue;
            };
            report.scanned += 1;
            if referenced.contains(&container) {
                continue;
            }

            let path = self.shard.path_for_id(&name);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path) {
                Ok(()) => {
                    log_gc_info!(container = %name, bytes = size, "Deleted unreferenced container");
                    report.bytes_freed += size;
                    report.deleted.push(name);
                }
                Err(e) => {
                    log_gc_error!(
                        container = %name,
                        error = %e,
                        "Failed to delete unreferenced container"
                    );
                    report.failed.push(name);
                }
            }
        }
    }

    /// Flush and close the index and both sequences.
    pub fn close(&self) -> Result<()> {
        self.index.close()?;
        self.data_lanes.close()?;
        self.meta_lanes.close()?;
        Ok(())
    }
}
