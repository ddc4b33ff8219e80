//! Per-identifier view of allocated storage.

use std::fs::{File, OpenOptions};
use std::io;

use tsfs_index::{LmdbIndex, OrderedIndex};
use tsfs_shard::FsId;

use crate::{LaneAddressSpace, NonContiguousFile, Result, StorageAllocator};

/// An identifier bound to its data and metadata lanes.
///
/// Borrows the allocator that produced it; all state changes go through
/// that allocator.
pub struct StorageHandle<'a, I: OrderedIndex = LmdbIndex> {
    allocator: &'a StorageAllocator<I>,
    id: FsId,
    data: LaneAddressSpace,
    meta: LaneAddressSpace,
}

impl<I: OrderedIndex> std::fmt::Debug for StorageHandle<'_, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("meta", &self.meta)
            .finish()
    }
}

impl<'a, I: OrderedIndex> StorageHandle<'a, I> {
    pub(crate) fn new(
        allocator: &'a StorageAllocator<I>,
        id: FsId,
        data: LaneAddressSpace,
        meta: LaneAddressSpace,
    ) -> Self {
        Self {
            allocator,
            id,
            data,
            meta,
        }
    }

    pub fn id(&self) -> &FsId {
        &self.id
    }

    pub fn data_space(&self) -> &LaneAddressSpace {
        &self.data
    }

    pub fn meta_space(&self) -> &LaneAddressSpace {
        &self.meta
    }

    /// Stream over the data lane. Its length is whatever the container
    /// file backs.
    pub fn data_stream(&self) -> Result<NonContiguousFile<LaneAddressSpace>> {
        let file = open_container(&self.data)?;
        Ok(NonContiguousFile::new(file, self.data.clone(), false)?)
    }

    /// Stream over the metadata lane, with its length stored in the lane.
    pub fn metadata_stream(&self) -> Result<NonContiguousFile<LaneAddressSpace>> {
        let file = open_container(&self.meta)?;
        Ok(NonContiguousFile::new(file, self.meta.clone(), true)?)
    }

    pub fn is_provisional(&self) -> Result<bool> {
        self.allocator.is_provisional(&self.id)
    }

    pub fn commit(&self) -> Result<()> {
        self.allocator.mark_persistent(std::slice::from_ref(&self.id))
    }

    /// A hard delete forgets the identifier; a soft delete makes it
    /// provisional again so a later commit restores it.
    pub fn delete(&self, hard: bool) -> Result<()> {
        if hard {
            self.allocator.remove(&self.id)?;
            Ok(())
        } else {
            self.allocator.set_provisional(&self.id, true)
        }
    }

    /// Forget the identifier, leaving its bytes for garbage collection.
    pub fn release(self) -> Result<()> {
        self.allocator.remove(&self.id)?;
        Ok(())
    }
}

fn open_container(space: &LaneAddressSpace) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(space.file())
}
