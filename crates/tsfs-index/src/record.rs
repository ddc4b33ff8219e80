//! Per-identifier location records.

/// A container file number and a lane within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneRef {
    pub file_id: u32,
    pub lane: u8,
}

impl LaneRef {
    pub fn new(file_id: u32, lane: u8) -> Self {
        Self { file_id, lane }
    }
}

/// Value stored in the index for every identifier that has storage.
///
/// `committed == false` marks a provisional allocation that a rollback may
/// remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRecord {
    /// Identifier known to the index without any lanes of its own
    Reserved { committed: bool },
    /// Identifier owning one data lane and one metadata lane
    Lanes {
        committed: bool,
        data: LaneRef,
        meta: LaneRef,
    },
}

impl LocationRecord {
    /// A fresh provisional record for a lane pair.
    pub fn provisional(data: LaneRef, meta: LaneRef) -> Self {
        Self::Lanes {
            committed: false,
            data,
            meta,
        }
    }

    pub fn is_committed(&self) -> bool {
        match *self {
            Self::Reserved { committed } | Self::Lanes { committed, .. } => committed,
        }
    }

    pub fn is_provisional(&self) -> bool {
        !self.is_committed()
    }

    /// Same record with the committed flag replaced.
    pub fn with_committed(self, committed: bool) -> Self {
        match self {
            Self::Reserved { .. } => Self::Reserved { committed },
            Self::Lanes { data, meta, .. } => Self::Lanes {
                committed,
                data,
                meta,
            },
        }
    }

    /// `(data, meta)` lanes, if this record owns any.
    pub fn lanes(&self) -> Option<(LaneRef, LaneRef)> {
        match *self {
            Self::Reserved { .. } => None,
            Self::Lanes { data, meta, .. } => Some((data, meta)),
        }
    }
}
