//! Concurrent access to one index from many threads.

use std::collections::HashSet;

use tempfile::TempDir;
use tsfs_index::{ExclusiveIndex, LaneRef, LmdbIndex, LocationRecord, OrderedIndex};
use tsfs_shard::FsId;

fn rec(n: u32) -> LocationRecord {
    LocationRecord::provisional(LaneRef::new(n, 0), LaneRef::new(n, 0))
}

#[test]
fn test_racing_inserts_converge_on_one_record() {
    let temp = TempDir::new().unwrap();
    let index = LmdbIndex::open(temp.path().join("idx")).unwrap();
    let id: FsId = "/pa/contested".parse().unwrap();

    let winners: Vec<LocationRecord> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..16u32)
            .map(|n| {
                let index = &index;
                let id = &id;
                s.spawn(move || index.insert_if_absent(id, rec(n)).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let distinct: HashSet<u32> = winners
        .iter()
        .map(|r| r.lanes().unwrap().0.file_id)
        .collect();
    assert_eq!(distinct.len(), 1);
    assert_eq!(index.find(&id).unwrap(), Some(winners[0]));
}

#[test]
fn test_mutations_interleaved_with_flushes() {
    let temp = TempDir::new().unwrap();
    let index = LmdbIndex::open(temp.path().join("idx")).unwrap();

    std::thread::scope(|s| {
        for t in 0..4u32 {
            let index = &index;
            s.spawn(move || {
                for i in 0..100u32 {
                    let id = FsId::new(format!("/t{}", t), format!("s{}", i)).unwrap();
                    index.insert(&id, rec(i)).unwrap();
                    if i % 2 == 0 {
                        index.delete(&id).unwrap();
                    }
                }
            });
        }
        s.spawn(|| {
            for _ in 0..20 {
                index.lock().unwrap().flush_pending().unwrap();
            }
        });
    });

    index.lock().unwrap().flush_pending().unwrap();
    assert_eq!(index.pending(), 0);
    assert_eq!(index.entries().unwrap().len(), 200);
}
