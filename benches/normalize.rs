use std::fmt::Write as _;
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;

use booktrade_ingest::data::Cell;
use booktrade_ingest::entity::EntityKind;
use booktrade_ingest::fields::FieldTable;
use booktrade_ingest::ingest::{IngestJob, Upload, ingest};
use booktrade_ingest::normalize::Normalizer;
use booktrade_ingest::resolve::RawRow;
use booktrade_ingest::store::SqliteStore;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

const HEADERS: [&str; 8] = [
    "Order ID",
    "Line",
    "ISBN",
    "Title",
    "Order Date",
    "Qty",
    "Unit Price",
    "Net",
];

fn sample_rows(count: usize) -> Vec<RawRow> {
    let headers: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    (0..count)
        .map(|i| {
            let cells = vec![
                Cell::text(format!("INV-{}", i / 3)),
                Cell::Number((i % 3 + 1) as f64),
                Cell::text(format!("978-0-14-{:06}-{}", i, i % 10)),
                Cell::text(format!("Title {i}")),
                Cell::text(format!("{:02}/{:02}/2025", i % 28 + 1, i % 12 + 1)),
                Cell::text(format!("{}", i % 5 + 1)),
                Cell::text(format!("£{}.{:02}", i % 40, i % 100)),
                Cell::Number((i % 200) as f64 + 0.99),
            ];
            RawRow::labeled(&headers, &cells)
        })
        .collect()
}

fn generate_csv(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let path = temp_dir.path().join("orders.csv");
    let mut body = HEADERS.join(",");
    body.push('\n');
    for i in 0..rows {
        let _ = writeln!(
            body,
            "INV-{},{},978014{:07},Title {i},{:02}/{:02}/2025,{},\"£1,{:03}.50\",{}.00",
            i / 3,
            i % 3 + 1,
            i,
            i % 28 + 1,
            i % 12 + 1,
            i % 5 + 1,
            i % 1000,
            i % 90,
        );
    }
    fs::write(&path, body).expect("write csv");
    (temp_dir, path)
}

fn bench_normalize(c: &mut Criterion) {
    let table = FieldTable::builtin(EntityKind::Sales);
    let normalizer = Normalizer::new(&table);
    let rows = sample_rows(10_000);

    let mut group = c.benchmark_group("normalize");
    group.bench_function("sales_rows", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(normalizer.record(row));
            }
        });
    });

    let (temp_dir, csv_path) = generate_csv(5_000);
    let job = IngestJob::new(EntityKind::Sales);
    group.bench_function("ingest_csv_in_memory_store", |b| {
        b.iter_batched(
            || {
                let staged = temp_dir.path().join("staged.csv");
                fs::copy(&csv_path, &staged).expect("stage copy");
                (
                    SqliteStore::open_in_memory().expect("store"),
                    Upload::adopt(staged),
                )
            },
            |(store, upload)| {
                ingest(&store, upload, &job).expect("ingest");
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
    drop(temp_dir);
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
