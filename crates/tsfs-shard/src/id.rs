//! Identifiers naming a logical time series or blob.

use std::fmt;
use std::str::FromStr;

use crate::{Result, ShardError, BIN_DIR_PREFIX, ENTRY_FILE};

/// Names a shard directory keeps for itself next to its bins.
const RESERVED_SEGMENTS: &[&str] = &[ENTRY_FILE, "fsid.lmdb", "fsid.btree", "data.seq", "meta.seq"];

/// An identifier made of a grouping `path` and a `name`.
///
/// Ordering and equality are structural: first by path, then by name.
/// The path selects the shard; the name selects the file inside it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsId {
    path: String,
    name: String,
}

impl FsId {
    /// Build an identifier, validating both parts.
    ///
    /// `path` must be absolute, must not end in `/` (other than the root
    /// itself) and must not contain NUL. Every segment must be non-empty,
    /// not `.` or `..`, must not start with the bin prefix and must not
    /// collide with a file a shard keeps beside its bins, so each path maps
    /// to exactly one directory under its root. `name` must be non-empty and
    /// free of `/` and NUL.
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let name = name.into();

        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains('\0')
        {
            return Err(ShardError::InvalidId(format!("bad path part {:?}", path)));
        }
        if path.len() > 1 {
            if let Some(segment) = path[1..].split('/').find(|s| !is_valid_segment(s)) {
                return Err(ShardError::InvalidId(format!(
                    "bad segment {:?} in path {:?}",
                    segment, path
                )));
            }
        }
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(ShardError::InvalidId(format!("bad name part {:?}", name)));
        }
        Ok(Self { path, name })
    }

    /// Identifier standing for a whole path; the name is a placeholder.
    pub fn for_path(path: impl Into<String>) -> Result<Self> {
        Self::new(path, "_")
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path relative to a data-type root (leading `/` stripped).
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.starts_with(BIN_DIR_PREFIX)
        && !RESERVED_SEGMENTS.contains(&segment)
}

impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path == "/" {
            write!(f, "/{}", self.name)
        } else {
            write!(f, "{}/{}", self.path, self.name)
        }
    }
}

impl FromStr for FsId {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        let split = s
            .rfind('/')
            .ok_or_else(|| ShardError::InvalidId(format!("{:?} has no path part", s)))?;
        let path = if split == 0 { "/" } else { &s[..split] };
        Self::new(path, &s[split + 1..])
    }
}
