use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use tsfs_shard::DirectoryShard;

fn bench_path_for_id(c: &mut Criterion) {
    let shard = DirectoryShard::load("/srv/tsfs/data/pa", 1031, 1, 1024);
    // warm the directory cache
    for bin in 0..shard.bin_count() {
        shard.dir_for_bin(bin);
    }

    c.bench_function("shard_path_for_id", |b| {
        b.iter(|| shard.path_for_id(black_box("kplr008462852-2009131105131")))
    });
}

fn bench_bin_for(c: &mut Criterion) {
    let shard = DirectoryShard::load("/srv/tsfs/data/pa", 1031, 1, 1024);

    c.bench_function("shard_bin_for", |b| {
        b.iter(|| shard.bin_for(black_box("kplr008462852-2009131105131")))
    });
}

fn bench_list_all_ids(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let shard = DirectoryShard::create(2000, 16, temp.path()).unwrap();
    for i in 0..1000 {
        std::fs::write(shard.path_for_id(&format!("s{}", i)), b"").unwrap();
    }

    c.bench_function("shard_list_1000_ids", |b| {
        b.iter(|| shard.list_all_ids().unwrap())
    });
}

criterion_group!(benches, bench_path_for_id, bench_bin_for, bench_list_all_ids);
criterion_main!(benches);
