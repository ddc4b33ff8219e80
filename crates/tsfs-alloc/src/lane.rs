//! Lane address translation for shared container files.
//!
//! ## Container Layout
//!
//! ```text
//! | header | lane0 | lane1 | ... | laneN-1 | lane0 | lane1 | ... |
//!          |<------ super block ------->|
//! ```
//!
//! Every lane segment is [`LANE_BLOCK_SIZE`] bytes. A lane's virtual
//! address space is the concatenation of its segments across all super
//! blocks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Size of one lane segment within a super block
pub const LANE_BLOCK_SIZE: u64 = 4096;

/// Physical addresses a sparse reader/writer may and may not touch.
pub trait ReservedAddressSpace {
    /// Physical address of a virtual address.
    fn xlate(&self, virtual_addr: u64) -> u64;

    /// Whether `physical_addr` belongs to someone else.
    fn is_used(&self, physical_addr: u64) -> bool;

    /// For an owned address, the last byte of its run of owned bytes. For a
    /// foreign address, the first owned byte after it.
    fn next_unused(&self, physical_addr: u64) -> u64;

    /// Exclusive end of the virtual address space backed by the file.
    fn last_virtual_addr(&self) -> io::Result<u64>;
}

/// Translator for one lane of one container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneAddressSpace {
    lane: u8,
    header_size: u64,
    lanes_per_container: u32,
    file_id: u32,
    file: PathBuf,
}

impl LaneAddressSpace {
    /// `file` is the container's path as placed by the owning shard.
    pub fn new(
        lane: u8,
        header_size: u64,
        lanes_per_container: u32,
        file_id: u32,
        file: PathBuf,
    ) -> Self {
        Self {
            lane,
            header_size,
            lanes_per_container,
            file_id,
            file,
        }
    }

    pub fn lane(&self) -> u8 {
        self.lane
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn super_block_size(&self) -> u64 {
        u64::from(self.lanes_per_container) * LANE_BLOCK_SIZE
    }

    pub fn first_block(&self) -> u64 {
        self.header_size + u64::from(self.lane) * LANE_BLOCK_SIZE
    }

    /// Virtual length implied by a physical file length.
    pub fn virtual_len_for(&self, physical_len: u64) -> u64 {
        let first = self.first_block();
        if physical_len <= first {
            return 0;
        }
        let rel = physical_len - first;
        let super_blocks = rel / self.super_block_size();
        let offset = rel % self.super_block_size();
        if offset <= LANE_BLOCK_SIZE {
            super_blocks * LANE_BLOCK_SIZE + offset
        } else {
            // file ends inside a foreign segment: our whole segment exists
            (super_blocks + 1) * LANE_BLOCK_SIZE
        }
    }
}

impl ReservedAddressSpace for LaneAddressSpace {
    fn xlate(&self, virtual_addr: u64) -> u64 {
        (virtual_addr / LANE_BLOCK_SIZE) * self.super_block_size()
            + virtual_addr % LANE_BLOCK_SIZE
            + self.first_block()
    }

    fn is_used(&self, physical_addr: u64) -> bool {
        let first = self.first_block();
        physical_addr < first
            || (physical_addr - first) % self.super_block_size() >= LANE_BLOCK_SIZE
    }

    fn next_unused(&self, physical_addr: u64) -> u64 {
        let first = self.first_block();
        if physical_addr < first {
            return first;
        }
        let offset = (physical_addr - first) % self.super_block_size();
        let segment_start = physical_addr - offset;
        if offset < LANE_BLOCK_SIZE {
            segment_start + LANE_BLOCK_SIZE - 1
        } else {
            segment_start + self.super_block_size()
        }
    }

    fn last_virtual_addr(&self) -> io::Result<u64> {
        match fs::metadata(&self.file) {
            Ok(meta) => Ok(self.virtual_len_for(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}
