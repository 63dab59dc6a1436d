//! Benchmarks for pipeline validation and health evaluation.

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deployflow::health::{evaluate_samples, window_ending_at, AlarmRule};
use deployflow::pipeline::{BlueprintSources, ServicePipelineBlueprint, ServiceStack};
use deployflow::ports::{Datapoint, SecretRef, SourceRepository};
use std::time::Duration;

fn sources() -> BlueprintSources {
    BlueprintSources {
        cdk: SourceRepository::new("acme", "pipeline-infra", "main"),
        service: SourceRepository::new("acme", "webapp", "main"),
        credentials: SecretRef::new("github-token"),
    }
}

fn blueprint_benchmark(c: &mut Criterion) {
    let environments: Vec<ServiceStack> = ["Dev", "Test", "Staging", "Prod"]
        .iter()
        .map(|env| ServiceStack::new(format!("ServiceStack{env}"), *env))
        .collect();

    c.bench_function("blueprint_build", |b| {
        b.iter(|| {
            let blueprint = environments.iter().fold(
                ServicePipelineBlueprint::new("ServicePipeline", "ServicePipelineStack", sources()),
                |bp, service| bp.add_service_stage(service, service.environment.clone()),
            );
            black_box(blueprint.build().is_ok())
        });
    });
}

fn alarm_benchmark(c: &mut Criterion) {
    let rule = AlarmRule::server_errors("Prod")
        .with_period(Duration::from_secs(60))
        .with_evaluation_periods(5);
    let now = Utc::now();
    let samples: Vec<Datapoint> = (0..300)
        .map(|i| Datapoint::new(now - ChronoDuration::seconds(i), f64::from(u32::try_from(i % 3).unwrap_or(0))))
        .collect();

    c.bench_function("alarm_evaluate_300_samples", |b| {
        b.iter(|| {
            let Some(window) = window_ending_at(&rule, now) else {
                return;
            };
            black_box(evaluate_samples(&rule, &window, &samples));
        });
    });
}

criterion_group!(benches, blueprint_benchmark, alarm_benchmark);
criterion_main!(benches);
