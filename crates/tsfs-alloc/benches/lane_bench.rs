use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use tsfs_alloc::{LaneAddressSpace, NonContiguousFile, ReservedAddressSpace};

fn bench_xlate(c: &mut Criterion) {
    let space = LaneAddressSpace::new(17, 512, 64, 0, PathBuf::from("/tmp/d-0.dat"));

    c.bench_function("lane_xlate", |b| {
        b.iter(|| space.xlate(black_box(1_234_567)))
    });
    c.bench_function("lane_next_unused", |b| {
        b.iter(|| space.next_unused(black_box(9_876_543)))
    });
}

fn bench_stream_write(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("d-0.dat");
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .unwrap();
    let space = LaneAddressSpace::new(3, 0, 64, 0, path);
    let mut stream = NonContiguousFile::new(file, space, false).unwrap();
    let data = vec![0x5Au8; 64 * 1024]; // 64KB across 16 segments

    c.bench_function("lane_stream_write_64kb", |b| {
        b.iter(|| {
            stream.seek(SeekFrom::Start(0)).unwrap();
            stream.write_all(black_box(&data)).unwrap()
        })
    });
}

criterion_group!(benches, bench_xlate, bench_stream_write);
criterion_main!(benches);
