//! Benchmarks for backoff interval and error bookkeeping.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeline_reconciler::backoff::Backoff;
use pipeline_reconciler::core::TaskErrors;
use std::time::Duration;

fn backoff_benchmark(c: &mut Criterion) {
    let backoff = Backoff::new()
        .with_interval(Duration::from_secs(5))
        .with_decline_ratio(2.0)
        .with_decline_limit(Duration::from_secs(600));

    c.bench_function("calculate_interval", |b| {
        b.iter(|| {
            for n in 0..32 {
                black_box(backoff.calculate_interval(black_box(n)));
            }
        })
    });

    c.bench_function("task_errors_append", |b| {
        b.iter(|| {
            let mut errors = TaskErrors::new();
            for n in 0..16 {
                errors.append(format!("attempt {}", n % 4));
            }
            black_box(errors)
        })
    });
}

criterion_group!(benches, backoff_benchmark);
criterion_main!(benches);
