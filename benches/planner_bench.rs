//! Benchmarks for the graph planner.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use waveflow::core::{CommandSpec, Job, Step, Transition};
use waveflow::manifest::{
    InputDescriptor, ManifestRegistry, OperationSpec, OutputDescriptor, ServiceManifest,
};
use waveflow::planner::plan;

fn registry() -> ManifestRegistry {
    let registry = ManifestRegistry::new();
    registry.register(
        ServiceManifest::new("bench_service")
            .with_operation(
                OperationSpec::new("source").with_output(OutputDescriptor::single("out")),
            )
            .with_operation(
                OperationSpec::new("transform")
                    .with_input(InputDescriptor::single("in"))
                    .with_output(OutputDescriptor::single("out")),
            ),
    );
    registry
}

/// A wide job: one source fanned into `width` independent consumers.
fn wide_job(width: usize) -> Job {
    let mut steps = vec![Step::new(
        "source",
        "bench_service",
        "source",
        CommandSpec::new("prog"),
    )
    .with_output("out", "o")];
    let mut transitions = Vec::new();

    for i in 0..width {
        let name = format!("consumer_{i}");
        steps.push(
            Step::new(&name, "bench_service", "transform", CommandSpec::new("prog"))
                .with_output("out", "o"),
        );
        transitions.push(Transition::new("source", &name).with_mapping("out", "in"));
    }

    let mut job = Job::new("bench-user", steps, transitions);
    job.step_mut("source").unwrap().instance_mut(0).unwrap().mark_complete(
        BTreeMap::from([("out".to_string(), serde_json::json!("source.wav"))]),
        BTreeMap::new(),
    );
    job
}

fn planner_benchmark(c: &mut Criterion) {
    let registry = registry();

    for width in [10usize, 100, 500] {
        let job = wide_job(width);
        c.bench_function(&format!("plan_wide_{width}"), |b| {
            b.iter(|| {
                let plan = plan(black_box(&job), &registry).unwrap();
                black_box(plan.ready.len())
            });
        });
    }
}

criterion_group!(benches, planner_benchmark);
criterion_main!(benches);
