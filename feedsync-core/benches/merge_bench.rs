use chrono::{Duration, NaiveDate};
use criterion::{criterion_group, criterion_main, Criterion};
use feedsync_core::{Row, Table};

fn series(start_offset: i64, len: i64) -> Table {
    let base = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    Table::from_rows(
        (start_offset..start_offset + len)
            .map(|i| Row::new(base + Duration::days(i)).with("close", i as f64))
            .collect(),
    )
}

fn merge_benchmark(c: &mut Criterion) {
    // A decade of daily history plus the typical incremental tail.
    let cached = series(0, 3650);
    let tail = series(3645, 10);

    c.bench_function("merge 3650 cached + 10 tail", |b| {
        b.iter(|| cached.merge(&tail))
    });

    let restated = series(0, 3650);
    c.bench_function("merge full restatement", |b| {
        b.iter(|| cached.merge(&restated))
    });
}

criterion_group!(benches, merge_benchmark);
criterion_main!(benches);
