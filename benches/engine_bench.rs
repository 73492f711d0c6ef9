// Throughput of the main read and write paths: sequential and random fills,
// random point reads against flushed tables, and full scans.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lsm_kv::{DB, Options, ReadOptions, WriteBatch, WriteOptions};
use rand::Rng;
use rand::seq::SliceRandom;
use std::hint::black_box;
use tempfile::TempDir;

const VALUE_SIZE: usize = 100;

fn key(i: u64) -> Vec<u8> {
    format!("{i:016}").into_bytes()
}

fn open() -> (TempDir, DB) {
    let dir = TempDir::new().unwrap();
    let options = Options {
        create_if_missing: true,
        ..Options::default()
    };
    let db = DB::open(dir.path(), options).unwrap();
    (dir, db)
}

fn populated(n: u64) -> (TempDir, DB) {
    let (dir, db) = open();
    let value = vec![b'v'; VALUE_SIZE];
    let mut batch = WriteBatch::new();
    for i in 0..n {
        batch.put(&key(i), &value);
        if batch.count() == 1000 {
            db.write(&WriteOptions::default(), std::mem::take(&mut batch)).unwrap();
        }
    }
    db.write(&WriteOptions::default(), batch).unwrap();
    db.compact_range(None, None).unwrap();
    (dir, db)
}

fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");
    let value = vec![b'v'; VALUE_SIZE];
    for &n in &[1_000u64, 10_000] {
        group.throughput(Throughput::Elements(n));

        group.bench_with_input(BenchmarkId::new("sequential", n), &n, |b, &n| {
            b.iter_with_setup(open, |(_dir, db)| {
                for i in 0..n {
                    db.put(&WriteOptions::default(), &key(i), &value).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random", n), &n, |b, &n| {
            let mut order: Vec<u64> = (0..n).collect();
            order.shuffle(&mut rand::thread_rng());
            b.iter_with_setup(open, |(_dir, db)| {
                for &i in &order {
                    db.put(&WriteOptions::default(), &key(i), &value).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("batched", n), &n, |b, &n| {
            b.iter_with_setup(open, |(_dir, db)| {
                let mut batch = WriteBatch::new();
                for i in 0..n {
                    batch.put(&key(i), &value);
                }
                db.write(&WriteOptions::default(), batch).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    const N: u64 = 50_000;
    let (_dir, db) = populated(N);
    let mut rng = rand::thread_rng();
    let read = ReadOptions::default();

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(1));
    group.bench_function("random_hit", |b| {
        b.iter(|| {
            let k = key(rng.gen_range(0..N));
            black_box(db.get(&read, &k).unwrap());
        });
    });
    group.bench_function("random_miss", |b| {
        b.iter(|| {
            let k = key(N + rng.gen_range(0..N));
            black_box(db.get(&read, &k).unwrap());
        });
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    const N: u64 = 50_000;
    let (_dir, db) = populated(N);

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(N));
    group.bench_function("forward", |b| {
        b.iter(|| {
            let count = db
                .iter(&ReadOptions::default())
                .unwrap()
                .entries()
                .map(|e| black_box(e.unwrap()))
                .count();
            assert_eq!(count as u64, N);
        });
    });
    group.bench_function("reverse", |b| {
        b.iter(|| {
            let count = db
                .iter(&ReadOptions::default())
                .unwrap()
                .entries_rev()
                .map(|e| black_box(e.unwrap()))
                .count();
            assert_eq!(count as u64, N);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_fill, bench_read, bench_scan);
criterion_main!(benches);
