//! Sequence-backed assignment of container lanes.

use std::path::Path;

use tsfs_index::{LaneRef, Sequence};

use crate::{AllocError, Result};

/// Hands out `(file_id, lane)` pairs, filling every lane of a container
/// before moving on to the next container.
#[derive(Debug)]
pub struct LaneAllocator {
    sequence: Sequence,
    lanes_per_container: u32,
}

impl LaneAllocator {
    pub fn open<P: AsRef<Path>>(sequence_path: P, lanes_per_container: u32) -> Result<Self> {
        if !(1..=256).contains(&lanes_per_container) {
            return Err(AllocError::InvalidConfig(format!(
                "lanes_per_container must be 1..=256, got {}",
                lanes_per_container
            )));
        }
        Ok(Self {
            sequence: Sequence::open(sequence_path)?,
            lanes_per_container,
        })
    }

    pub fn next(&self) -> Result<LaneRef> {
        let n = self.sequence.next()?;
        let lanes = u64::from(self.lanes_per_container);
        let file_id = u32::try_from(n / lanes).map_err(|_| AllocError::LanesExhausted)?;
        // lanes_per_container <= 256
        let lane = (n % lanes) as u8;
        Ok(LaneRef::new(file_id, lane))
    }

    pub fn close(&self) -> Result<()> {
        Ok(self.sequence.close()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rolls_over_to_next_container() {
        let temp = TempDir::new().unwrap();
        let alloc = LaneAllocator::open(temp.path().join("d.seq"), 3).unwrap();
        let got: Vec<(u32, u8)> = (0..7)
            .map(|_| {
                let r = alloc.next().unwrap();
                (r.file_id, r.lane)
            })
            .collect();
        assert_eq!(got, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2), (2, 0)]);
    }

    #[test]
    fn test_full_width_lanes() {
        let temp = TempDir::new().unwrap();
        let alloc = LaneAllocator::open(temp.path().join("d.seq"), 256).unwrap();
        for expected in 0..=255u8 {
            assert_eq!(alloc.next().unwrap(), LaneRef::new(0, expected));
        }
        assert_eq!(alloc.next().unwrap(), LaneRef::new(1, 0));
    }

    #[test]
    fn test_rejects_bad_lane_count() {
        let temp = TempDir::new().unwrap();
        assert!(LaneAllocator::open(temp.path().join("a"), 0).is_err());
        assert!(LaneAllocator::open(temp.path().join("b"), 257).is_err());
    }
}
