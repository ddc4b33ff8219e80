//! # tsfs-shard
//!
//! Bounded fan-out directory sharding for the time series file store.
//!
//! Identifiers are spread over a fixed, pre-created tree of bin
//! directories so that no single directory grows past a configured number
//! of entries. One [`DirectoryShard`] exists per identifier path; the
//! [`ShardRegistry`] creates, persists and recovers them across one or more
//! filesystem roots.
//!
//! ## On-disk Layout
//!
//! ```text
//! <root>/
//! └── data/                   # fixed data-type segment
//!     └── pa/pdc/             # identifier path
//!         ├── shard.properties
//!         └── hd-4/hd-0/...   # bin directories
//! ```

mod id;
mod locator;
mod query;
mod registry;
mod shard;

pub use id::FsId;
pub use locator::{FileSystemLocator, PrefixLocator, SingleRootLocator};
pub use query::{IdFilter, PathMatch, PathQuery};
pub use registry::{ShardRegistry, DATA_TYPE_DIR, ENTRY_FILE};
pub use shard::{
    is_prime, next_prime, CollisionStats, DirectoryShard, BIN_DIR_PREFIX, FILE_SUFFIX, MAX_LEVELS,
};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during shard operations
#[derive(Error, Debug)]
pub enum ShardError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid shard configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Not a shard data file: {}", .0.display())]
    NotAShardFile(PathBuf),

    #[error("Failed to create bin {bin}: {source}")]
    BinCreation {
        bin: u64,
        #[source]
        source: io::Error,
    },

    #[error("Identifier found in more than one root: {0}")]
    DuplicateId(FsId),

    #[error("Registry is read-only, cannot create shard for {0}")]
    ReadOnly(String),

    #[error("Registry entry corrupted at {}: {reason}", .path.display())]
    Corrupted { path: PathBuf, reason: String },

    #[error("Shard cache lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ShardError>;
