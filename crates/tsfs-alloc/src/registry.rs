//! One storage allocator per identifier path.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tsfs_config::{log_gc_info, Config, LaneConfig};
use tsfs_shard::{FsId, IdFilter, PathQuery, ShardRegistry};

use crate::{AllocError, GcReport, Result, StorageAllocator};

/// Opens and caches [`StorageAllocator`]s on top of a [`ShardRegistry`].
#[derive(Debug)]
pub struct AllocatorRegistry {
    shards: ShardRegistry,
    lanes: LaneConfig,
    allocators: Mutex<HashMap<String, Arc<StorageAllocator>>>,
}

impl AllocatorRegistry {
    pub fn new(shards: ShardRegistry, lanes: LaneConfig) -> Self {
        Self {
            shards,
            lanes,
            allocators: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ShardRegistry::from_config(config), config.lanes.clone())
    }

    pub fn shards(&self) -> &ShardRegistry {
        &self.shards
    }

    /// The allocator responsible for `id`'s path, creating its shard when
    /// `create` is set.
    pub fn find_allocator(&self, id: &FsId, create: bool) -> Result<Option<Arc<StorageAllocator>>> {
        let mut allocators = self.allocators.lock().map_err(|_| AllocError::LockPoisoned)?;
        if let Some(allocator) = allocators.get(id.path()) {
            return Ok(Some(Arc::clone(allocator)));
        }

        let Some(shard) = self.shards.find(id, create, false)? else {
            return Ok(None);
        };
        let allocator = Arc::new(StorageAllocator::open(shard, &self.lanes)?);
        allocators.insert(id.path().to_string(), Arc::clone(&allocator));
        Ok(Some(allocator))
    }

    /// Committed identifiers across every shard matching `filter`.
    pub fn find(&self, filter: &dyn IdFilter) -> Result<BTreeSet<FsId>> {
        let mut found = BTreeSet::new();
        for path in self.shards.find_paths(filter)? {
            let Some(allocator) = self.find_allocator(&path, false)? else {
                continue;
            };
            found.extend(
                allocator
                    .all_committed_ids()?
                    .into_iter()
                    .filter(|id| filter.matches(id)),
            );
        }
        Ok(found)
    }

    /// Garbage collect every shard.
    pub fn garbage_collect_all(&self) -> Result<Vec<GcReport>> {
        let mut reports = Vec::new();
        for path in self.shards.find_paths(&PathQuery::under("/"))? {
            if let Some(allocator) = self.find_allocator(&path, false)? {
                reports.push(allocator.garbage_collect()?);
            }
        }
        let deleted: usize = reports.iter().map(|r| r.deleted.len()).sum();
        let bytes_freed: u64 = reports.iter().map(|r| r.bytes_freed).sum();
        log_gc_info!(shards = reports.len(), deleted, bytes_freed, "Garbage collection complete");
        Ok(reports)
    }

    /// Drop cached allocators and shards without closing them.
    pub fn clear(&self) -> Result<()> {
        self.allocators.lock().map_err(|_| AllocError::LockPoisoned)?.clear();
        self.shards.clear()?;
        Ok(())
    }

    /// Close every cached allocator, then clear the caches.
    pub fn close(&self) -> Result<()> {
        {
            let allocators = self.allocators.lock().map_err(|_| AllocError::LockPoisoned)?;
            for allocator in allocators.values() {
                allocator.close()?;
            }
        }
        self.clear()
    }
}
