//! Benchmarks for the Stage Registry's dependency compilation
//! (`SPEC_FULL.md` §4.1): registration, cycle detection, and topological
//! sort over dependency chains of varying shape and size.

use buildforge::registry::{StageDefinition, StageRegistry};
use buildforge::types::StageStatus;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn linear_chain(n: usize) -> Vec<StageDefinition> {
    let ids: Vec<String> = (0..n).map(|i| format!("stage_{i}")).collect();
    (0..n)
        .map(|i| {
            let mut builder = StageDefinition::builder(&ids[i], format!("Stage {i}")).allowed_statuses([StageStatus::Done]);
            if i > 0 {
                builder = builder.dependencies(&[ids[i - 1].as_str()]);
            }
            builder.build().expect("valid id")
        })
        .collect()
}

fn fanout_layer(width: usize) -> Vec<StageDefinition> {
    let mut defs = vec![StageDefinition::builder("root", "Root").allowed_statuses([StageStatus::Done]).build().unwrap()];
    for i in 0..width {
        defs.push(
            StageDefinition::builder(&format!("leaf_{i}"), format!("Leaf {i}"))
                .allowed_statuses([StageStatus::Done])
                .dependencies(&["root"])
                .build()
                .unwrap(),
        );
    }
    defs
}

fn bench_register_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_register_batch");
    for size in [10, 50, 200] {
        group.bench_with_input(BenchmarkId::new("linear", size), &size, |b, &size| {
            b.iter(|| {
                let registry = StageRegistry::new();
                registry.register_batch(linear_chain(size)).expect("valid batch");
            });
        });
        group.bench_with_input(BenchmarkId::new("fanout", size), &size, |b, &size| {
            b.iter(|| {
                let registry = StageRegistry::new();
                registry.register_batch(fanout_layer(size)).expect("valid batch");
            });
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_compile");
    for size in [10, 50, 200] {
        let registry = StageRegistry::new();
        registry.register_batch(linear_chain(size)).expect("valid batch");
        group.bench_with_input(BenchmarkId::new("linear", size), &registry, |b, registry| {
            b.iter(|| registry.compile().expect("acyclic"));
        });
    }
    group.finish();
}

fn bench_builtins_compile(c: &mut Criterion) {
    c.bench_function("registry_compile_builtins", |b| {
        let registry = StageRegistry::with_builtins();
        b.iter(|| registry.compile().expect("built-in plan is acyclic"));
    });
}

criterion_group!(benches, bench_register_batch, bench_compile, bench_builtins_compile);
criterion_main!(benches);
