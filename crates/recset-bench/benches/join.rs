//! Join algorithm benchmarks.
//!
//! Forces each algorithm through its hint over the same indexed inputs,
//! so the numbers compare algorithms rather than plans.

use std::sync::Arc;

use criterion::{black_box, criterion_group, BenchmarkId, Criterion};
use recset_bench::{orders_index, users_index, Scale};
use recset_core::{compile, EnumerationContext, JoinHint, JoinKind, Provider};

fn joined(scale: Scale, hint: JoinHint) -> Arc<Provider> {
    Arc::new(
        Provider::join(
            users_index(scale),
            orders_index(scale),
            JoinKind::Inner,
            hint,
            vec![(0, 1)],
        )
        .unwrap(),
    )
}

fn bench_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/algorithms");
    group.sample_size(20);

    let scale = Scale::Medium;
    for hint in [
        JoinHint::NestedLoop,
        JoinHint::Hash,
        JoinHint::Loop,
        JoinHint::Merge,
    ] {
        let compiled = compile(&joined(scale, hint)).unwrap();
        group.bench_with_input(
            BenchmarkId::new(format!("{hint:?}"), scale.users()),
            &compiled,
            |b, compiled| {
                b.iter(|| {
                    let ctx = EnumerationContext::new();
                    let rows = compiled.enumerate(&ctx).unwrap().count();
                    black_box(rows);
                });
            },
        );
    }

    group.finish();
}

fn bench_merge_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/merge_scaling");
    group.sample_size(20);

    for scale in [Scale::Small, Scale::Medium, Scale::Large] {
        let compiled = compile(&joined(scale, JoinHint::Auto)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("users", scale.users()),
            &compiled,
            |b, compiled| {
                b.iter(|| {
                    let ctx = EnumerationContext::new();
                    let rows = compiled.enumerate(&ctx).unwrap().count();
                    black_box(rows);
                });
            },
        );
    }

    group.finish();
}

fn bench_left_outer(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/left_outer");
    group.sample_size(20);

    let scale = Scale::Medium;
    let plan = Arc::new(
        Provider::join(
            users_index(scale),
            orders_index(scale),
            JoinKind::LeftOuter,
            JoinHint::Auto,
            vec![(0, 1)],
        )
        .unwrap(),
    );
    let compiled = compile(&plan).unwrap();

    group.bench_function("merge", |b| {
        b.iter(|| {
            let ctx = EnumerationContext::new();
            let rows = compiled.enumerate(&ctx).unwrap().count();
            black_box(rows);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_algorithms,
    bench_merge_scaling,
    bench_left_outer
);

fn main() {
    recset_bench::init_tracing();
    benches();
    Criterion::default().configure_from_args().final_summary();
}
