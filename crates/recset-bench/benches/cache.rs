//! Plan cache benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, Criterion};
use recset_bench::{orders_index, users_index, Scale};
use recset_core::{
    compile, Expr, JoinHint, JoinKind, PlanCache, PlanFingerprint, Provider,
};
use recset_tuple::Value;

fn deep_plan(scale: Scale) -> Arc<Provider> {
    let join = Provider::join(
        users_index(scale),
        orders_index(scale),
        JoinKind::Inner,
        JoinHint::Auto,
        vec![(0, 1)],
    )
    .unwrap();
    let filtered = Provider::filter(
        join,
        Expr::gt(Expr::column(2), Expr::literal(Value::Int32(30))),
    )
    .unwrap();
    Arc::new(Provider::select(filtered, vec![0, 1, 3]).unwrap())
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/fingerprint");

    let plan = deep_plan(Scale::Small);
    group.bench_function("deep_plan", |b| {
        b.iter(|| {
            black_box(PlanFingerprint::from_provider(&plan));
        });
    });

    group.finish();
}

fn bench_compile_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/compile_cold");

    let plan = deep_plan(Scale::Small);
    group.bench_function("deep_plan", |b| {
        b.iter(|| {
            black_box(compile(&plan).unwrap());
        });
    });

    group.finish();
}

fn bench_cached_hot(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/cached_hot");

    let plan = deep_plan(Scale::Small);
    let cache = PlanCache::new(64);
    cache.get_or_compile(&plan).unwrap();

    group.bench_function("deep_plan", |b| {
        b.iter(|| {
            black_box(cache.get_or_compile(&plan).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_compile_cold, bench_cached_hot);

fn main() {
    recset_bench::init_tracing();
    benches();
    Criterion::default().configure_from_args().final_summary();
}
