//! # tsfs-alloc
//!
//! Storage allocation for identifiers in lane-packed container files.
//!
//! Many small byte streams share one container file. Each stream owns one
//! lane: a fixed-size segment repeated in every super block of the file.
//! Every identifier gets a data lane and a metadata lane, recorded in an
//! [`OrderedIndex`](tsfs_index::OrderedIndex) next to its shard.
//!
//! ## Shard Layout
//!
//! ```text
//! <shard root>/
//! ├── shard.properties
//! ├── fsid.lmdb/          # identifier -> LocationRecord
//! ├── data.seq            # data lane sequence
//! ├── meta.seq            # metadata lane sequence
//! └── hd-*/.../d-17.dat   # containers, placed by the shard
//! ```

mod allocator;
mod handle;
mod lane;
mod lane_allocator;
mod registry;
mod stream;

pub use allocator::{
    container_name, parse_container_name, ContainerKind, GcReport, StorageAllocator,
    DATA_SEQUENCE_FILE, INDEX_DIR, LEGACY_INDEX_FILE, META_SEQUENCE_FILE,
};
pub use handle::StorageHandle;
pub use lane::{LaneAddressSpace, ReservedAddressSpace, LANE_BLOCK_SIZE};
pub use lane_allocator::LaneAllocator;
pub use registry::AllocatorRegistry;
pub use stream::NonContiguousFile;

use std::path::PathBuf;

use thiserror::Error;
use tsfs_index::IndexError;
use tsfs_shard::{FsId, ShardError};

/// Errors that can occur during allocation
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Index at {} has not been converted to the current format", .0.display())]
    UnconvertedIndex(PathBuf),

    #[error("Unknown identifier: {0}")]
    UnknownId(FsId),

    #[error("Identifier has no lanes assigned: {0}")]
    NoStorage(FsId),

    #[error("Container file numbers exhausted")]
    LanesExhausted,

    #[error("Invalid lane configuration: {0}")]
    InvalidConfig(String),

    #[error("Allocator cache lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, AllocError>;
