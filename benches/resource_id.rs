//! Benchmarks for address parsing, storage keys and route resolution
//!
//! These run on every request, so they are kept allocation-light.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use universal_control_plane::config::OrchestratorSettings;
use universal_control_plane::controlplane::router::BackendSet;
use universal_control_plane::controlplane::{MemoryQueue, NoopTelemetry, Orchestrator, PlaneRegistry, Router};
use universal_control_plane::store::keys::{id_matches_query, StorageKey};
use universal_control_plane::{MemoryStore, Plane, PlaneKind, Query, RequestMethod, ResourceId};

const NESTED: &str = "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/applications/app/containers/web";
const AWS: &str = "/planes/aws/aws/accounts/123456789012/regions/us-west-2/providers/AWS.Kinesis/Stream/my-stream";

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_id");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse_nested", |b| {
        b.iter(|| ResourceId::parse(black_box(NESTED)));
    });

    group.bench_function("parse_target_collection", |b| {
        b.iter(|| ResourceId::parse_target(black_box("/planes/aws/aws/accounts/1/regions/r/providers/AWS.S3/Bucket")));
    });

    group.finish();
}

fn bench_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_keys");
    group.throughput(Throughput::Elements(1));

    let Ok(id) = ResourceId::parse(NESTED) else {
        return;
    };
    let query = Query::from_id(&id);

    group.bench_function("storage_key", |b| {
        b.iter(|| StorageKey::from_id(black_box(&id)));
    });

    group.bench_function("query_match", |b| {
        b.iter(|| id_matches_query(black_box(&id), black_box(&query)));
    });

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");
    group.throughput(Throughput::Elements(1));

    let Ok(rt) = tokio::runtime::Runtime::new() else {
        return;
    };
    let _guard = rt.enter();

    let mut planes = vec![
        Plane::new("radius", "local", PlaneKind::UcpNative),
        Plane::new("aws", "aws", PlaneKind::Aws),
    ];
    for i in 0..100 {
        planes.push(Plane::new("kubernetes", &format!("cluster-{}", i), PlaneKind::Kubernetes));
    }
    let Ok(registry) = PlaneRegistry::new(planes) else {
        return;
    };
    let settings = OrchestratorSettings::default();
    let orchestrator = Orchestrator::new(
        settings.clone(),
        Arc::new(MemoryStore::new()),
        MemoryQueue::new(settings.queue_capacity, settings.lease_duration()),
        Arc::new(NoopTelemetry),
    );
    let router = Router::new(
        "/apis/api.ucp.dev/v1alpha3",
        registry,
        orchestrator,
        BackendSet::default(),
        Arc::new(NoopTelemetry),
    );
    let path = format!("/apis/api.ucp.dev/v1alpha3{}", AWS);

    group.bench_function("resolve_aws", |b| {
        b.iter(|| router.resolve(RequestMethod::Get, black_box(&path)));
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_storage, bench_resolve);
criterion_main!(benches);
