use bloom::FilterKey;
use config::SSTableConfig;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::{Cell, Clustering, Memtable};
use sstable::{flush_memtable, Descriptor, SSTableReader, Version};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn build_memtable() -> Memtable {
    let mut mem = Memtable::new();
    for i in 0..N_KEYS {
        mem.put(
            format!("key{}", i).as_bytes(),
            Clustering::EMPTY,
            Cell::live("v", i as i64, vec![b'x'; VALUE_SIZE]),
        );
    }
    mem
}

fn config() -> SSTableConfig {
    SSTableConfig {
        sync_on_finish: false,
        ..SSTableConfig::default()
    }
}

fn write_table(mem: &Memtable) -> (tempfile::TempDir, SSTableReader) {
    let dir = tempdir().unwrap();
    let reader = flush_memtable(
        mem,
        Descriptor::new(dir.path(), 1, Version::Nb),
        &config(),
        std::iter::empty(),
    )
    .unwrap();
    (dir, reader)
}

fn sstable_write_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_flush_memtable_10k", |b| {
        b.iter_batched(
            build_memtable,
            |mem| write_table(&mem),
            BatchSize::SmallInput,
        );
    });
}

fn sstable_get_hit_benchmark(c: &mut Criterion) {
    let mem = build_memtable();
    let (_dir, reader) = write_table(&mem);
    c.bench_function("sstable_partition_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let key = format!("key{}", i).into_bytes();
                assert!(reader.partition(&key).unwrap().is_some());
            }
        });
    });
}

fn sstable_get_miss_benchmark(c: &mut Criterion) {
    let mem = build_memtable();
    let (_dir, reader) = write_table(&mem);
    c.bench_function("sstable_partition_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let key = format!("missing{}", i).into_bytes();
                assert!(reader.partition(&key).unwrap().is_none());
            }
        });
    });
}

fn bloom_benchmark(c: &mut Criterion) {
    let keys: Vec<Vec<u8>> = (0..N_KEYS).map(|i| format!("key{}", i).into_bytes()).collect();
    c.bench_function("bloom_add_10k", |b| {
        b.iter(|| {
            let mut filter = bloom::get_filter(N_KEYS as u64, 0.01).unwrap();
            for k in &keys {
                filter.add(k as &dyn FilterKey);
            }
            filter
        });
    });

    let mut filter = bloom::get_filter(N_KEYS as u64, 0.01).unwrap();
    for k in &keys {
        filter.add(k as &dyn FilterKey);
    }
    c.bench_function("bloom_is_present_10k", |b| {
        b.iter(|| keys.iter().filter(|k| filter.is_present(*k as &dyn FilterKey)).count());
    });
}

criterion_group!(
    benches,
    sstable_write_benchmark,
    sstable_get_hit_benchmark,
    sstable_get_miss_benchmark,
    bloom_benchmark
);
criterion_main!(benches);
