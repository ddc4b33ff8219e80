//! # tsfs-index
//!
//! Ordered, concurrent, disk-backed map from [`FsId`] to [`LocationRecord`],
//! and the persisted [`Sequence`] used to mint container and lane numbers.
//!
//! Two locks guard an index:
//! - Point operations take a shared structure lock plus a per-key lock,
//!   so traffic for different identifiers never serializes.
//! - [`OrderedIndex::lock`] takes the structure lock exclusively. Only
//!   maintenance (flush, garbage collection) does this.

mod codec;
mod lmdb;
mod record;
mod sequence;

pub use codec::{FsIdCodec, RecordCodec};
pub use lmdb::{LmdbExclusive, LmdbIndex};
pub use record::{LaneRef, LocationRecord};
pub use sequence::Sequence;

use thiserror::Error;
use tsfs_shard::FsId;

/// Errors that can occur during index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index corrupted: {0}")]
    Corrupted(String),

    #[error("Index is closed")]
    Closed,

    #[error("Index structure lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Contract the storage allocator needs from its index.
///
/// Every method except [`lock`](Self::lock) is a hot-path operation and
/// must stay safe to call from many threads at once.
pub trait OrderedIndex: Send + Sync {
    /// Guard holding the whole index exclusively; dropping it unlocks.
    type Exclusive<'a>: ExclusiveIndex
    where
        Self: 'a;

    fn find(&self, id: &FsId) -> Result<Option<LocationRecord>>;

    /// Store `record`, replacing any previous one.
    fn insert(&self, id: &FsId, record: LocationRecord) -> Result<()>;

    /// Store `record` unless `id` is already present. Returns whichever
    /// record is in the index afterwards.
    fn insert_if_absent(&self, id: &FsId, record: LocationRecord) -> Result<LocationRecord>;

    /// Remove `id`. Returns whether it was present.
    fn delete(&self, id: &FsId) -> Result<bool>;

    /// Remove `id` only if its current record satisfies `pred`, atomically
    /// with respect to other point operations on `id`.
    fn delete_if<F>(&self, id: &FsId, pred: F) -> Result<bool>
    where
        F: FnOnce(&LocationRecord) -> bool;

    /// Replace the record of `id` with `update(current)` when that returns
    /// `Some`. Returns whether a replacement happened.
    fn replace_if<F>(&self, id: &FsId, update: F) -> Result<bool>
    where
        F: FnOnce(&LocationRecord) -> Option<LocationRecord>;

    /// All entries in identifier order.
    fn entries(&self) -> Result<Vec<(FsId, LocationRecord)>>;

    /// Take the whole-structure lock.
    fn lock(&self) -> Result<Self::Exclusive<'_>>;

    /// Flush pending state and refuse further operations.
    fn close(&self) -> Result<()>;
}

/// Operations available while holding the whole-structure lock.
pub trait ExclusiveIndex {
    fn entries(&self) -> Result<Vec<(FsId, LocationRecord)>>;

    /// Make every mutation so far durable.
    fn flush_pending(&mut self) -> Result<()>;
}
