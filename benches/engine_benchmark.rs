use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use stratadb::prelude::*;
use tempfile::TempDir;

const DURATION: i64 = 1_000_000;
const RESOLUTION: i64 = 1_000;

fn bench_database(dir: &TempDir) -> Database {
    let mut options = DatabaseOptions::new(dir.path());
    options.params = DatabaseParams {
        duration: DURATION,
        retention: 8 * DURATION,
        resolution: RESOLUTION,
        segment_size: 1024 * 1024,
        max_ro_epochs: 2,
        max_rw_epochs: 2,
        ..DatabaseParams::default()
    };
    Database::open_with_clock(options, Arc::new(ManualClock::new(0))).unwrap()
}

fn tuple(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn benchmark_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("track");

    for tuples in [1usize, 16, 256].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(tuples), tuples, |b, &tuples| {
            let dir = TempDir::new().unwrap();
            let db = bench_database(&dir);
            let fields: Vec<Vec<String>> = (0..tuples)
                .map(|i| tuple(&["host", "cpu", &format!("core{}", i)]))
                .collect();

            let mut i = 0usize;
            b.iter(|| {
                let ts = ((i as i64) * RESOLUTION) % DURATION;
                db.track(black_box(ts), &fields[i % tuples], 1.0, 1).unwrap();
                i += 1;
            });

            db.close().unwrap();
        });
    }

    group.finish();
}

fn benchmark_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch");

    let dir = TempDir::new().unwrap();
    let db = bench_database(&dir);
    let fields = tuple(&["host", "cpu", "core0"]);
    for slot in 0..(DURATION / RESOLUTION) {
        db.track(slot * RESOLUTION, &fields, 1.0, 1).unwrap();
    }

    group.throughput(Throughput::Elements((DURATION / RESOLUTION) as u64));
    group.bench_function("one_full_epoch", |b| {
        b.iter(|| {
            let points = db.one(black_box(0), DURATION, &fields).unwrap();
            black_box(points);
        });
    });

    group.bench_function("wildcard_full_epoch", |b| {
        let pattern = tuple(&["host", "cpu", "*"]);
        b.iter(|| {
            let chunks = db.fetch(black_box(0), DURATION, &pattern).unwrap();
            black_box(chunks);
        });
    });

    group.finish();

    db.close().unwrap();
}

criterion_group!(benches, benchmark_track, benchmark_fetch);
criterion_main!(benches);
