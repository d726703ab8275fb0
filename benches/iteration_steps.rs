//! Benchmarks for iteration-step building and fingerprinting
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slotflow::data::{AnnotationSet, DataTable, JsonData, SlotInfo};
use slotflow::iteration::{IterationSettings, IterationStepBuilder, IterationStrategy};

/// `rows` text rows annotated with `sample` (unique) and `plate` (rows / 8 groups).
fn annotated_table(rows: usize, prefix: &str) -> DataTable {
    let mut table = DataTable::new();
    for i in 0..rows {
        let mut annotations = AnnotationSet::new();
        annotations.set("sample", format!("s{}", i));
        annotations.set("plate", format!("p{}", i % 8));
        table.add_row(JsonData::text(format!("{}{}", prefix, i)).into_item(), annotations);
    }
    table
}

fn bench_single_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_row_join");
    let slots = vec![SlotInfo::new("left", "text"), SlotInfo::new("right", "text")];

    for rows in [100usize, 1_000, 5_000] {
        let tables = vec![annotated_table(rows, "l"), annotated_table(rows, "r")];
        let strategy = IterationStrategy::SingleRow(IterationSettings::with_keys(["sample"]));
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let plan = IterationStepBuilder::new(&slots, &tables)
                    .build(black_box(&strategy))
                    .unwrap();
                black_box(plan.steps.len())
            });
        });
    }
    group.finish();
}

fn bench_grouped(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouped_by_plate");
    let slots = vec![SlotInfo::new("input", "text")];

    for rows in [100usize, 1_000, 5_000] {
        let tables = vec![annotated_table(rows, "v")];
        let strategy = IterationStrategy::Grouped(IterationSettings::with_keys(["plate"]));
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let plan = IterationStepBuilder::new(&slots, &tables)
                    .build(black_box(&strategy))
                    .unwrap();
                black_box(plan.steps.len())
            });
        });
    }
    group.finish();
}

fn bench_table_fingerprint(c: &mut Criterion) {
    let table = annotated_table(5_000, "f");
    c.bench_function("table_fingerprint_5000", |b| {
        b.iter(|| black_box(&table).fingerprint())
    });
}

criterion_group!(benches, bench_single_row, bench_grouped, bench_table_fingerprint);
criterion_main!(benches);
