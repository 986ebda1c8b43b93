//! Criterion measurements of the parameter cache hit path and of a full positional
//! stored-procedure call through the helper, both against the in-memory backend so only
//! the helper's own overhead is measured.

use std::sync::{Arc, LazyLock};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use sql_helper::prelude::*;
use sql_helper::test_utils::{MEMORY_CONNECTION_STRING, MemoryDriver, Response, int_inputs};
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

/// Number of distinct procedures the workload cycles through.
fn procedure_count() -> usize {
    std::env::var("BENCH_PROCEDURES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(64)
}

/// A driver with `count` two-argument procedures and a shuffled call order.
fn workload(count: usize) -> (MemoryDriver, Vec<String>) {
    let driver = MemoryDriver::new();
    let mut names = (0..count)
        .map(|i| format!("usp_bench_{i}"))
        .collect::<Vec<_>>();
    for name in &names {
        driver.define_procedure(name, int_inputs(&["@a", "@b"]), |call| {
            let a = call.value("@a").and_then(DbValue::as_int).copied().unwrap_or(0);
            Ok(Response::scalar(a))
        });
    }
    let mut rng = ChaCha8Rng::seed_from_u64(1_234_567_890);
    names.shuffle(&mut rng);
    (driver, names)
}

fn bench_cache_hits(c: &mut Criterion) {
    let count = procedure_count();
    let (driver, names) = workload(count);
    let cache = ParameterCache::new(Arc::new(driver), None);

    // Warm every template so the measured loop only sees hits.
    TOKIO_RUNTIME.block_on(async {
        for name in &names {
            cache
                .get_sp_parameter_set(MEMORY_CONNECTION_STRING, name)
                .await
                .expect("warm cache");
        }
    });

    let cache = &cache;
    let mut group = c.benchmark_group("parameter_cache");
    group.throughput(Throughput::Elements(count as u64));
    group.bench_with_input(BenchmarkId::new("hit", count), &names, |b, names| {
        b.to_async(&*TOKIO_RUNTIME).iter(move || async move {
            for name in names {
                let template = cache
                    .get_sp_parameter_set(MEMORY_CONNECTION_STRING, name)
                    .await
                    .expect("cached template");
                black_box(template);
            }
        });
    });
    group.finish();
}

fn bench_positional_calls(c: &mut Criterion) {
    let count = procedure_count();
    let (driver, names) = workload(count);
    let helper = SqlHelper::new(Arc::new(driver));
    let args = param_args![7, 8];

    let (helper, args) = (&helper, &args);
    let mut group = c.benchmark_group("execute_scalar_sp");
    group.throughput(Throughput::Elements(count as u64));
    group.bench_with_input(BenchmarkId::new("memory", count), &names, |b, names| {
        b.to_async(&*TOKIO_RUNTIME).iter(move || async move {
            for name in names {
                let value = helper
                    .execute_scalar_sp(MEMORY_CONNECTION_STRING, name, args)
                    .await
                    .expect("scalar call");
                black_box(value);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_cache_hits, bench_positional_calls);
criterion_main!(benches);
