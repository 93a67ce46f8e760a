use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use lab_snapshot::{IncrementalRecord, calculate_bounds};

fn bench_fold(c: &mut Criterion) {
    let records: Vec<IncrementalRecord> = (0..10_000)
        .map(|i| IncrementalRecord {
            database: "mainnet".to_owned(),
            table: format!("table_{}", i % 16),
            position: (i * 37) % 1_000_000,
            interval: 1_000,
            updated_at: None,
        })
        .collect();

    c.bench_function("calculate_bounds_10k_records", |b| {
        b.iter(|| calculate_bounds(black_box(&records)))
    });
}

criterion_group!(benches, bench_fold);
criterion_main!(benches);
