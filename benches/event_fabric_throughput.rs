use buildforge::event_fabric::{EventEnvelope, EventFabric};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

async fn publish_batch(fabric: &EventFabric, build_id: &str, batch: usize) {
    for i in 0..batch {
        fabric
            .publish(build_id, EventEnvelope::stage_update(build_id, "coding_file", "RUNNING", format!("event-{i}")))
            .await
            .expect("publish");
    }
}

fn event_fabric_publish(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("event_fabric_publish");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&runtime).iter(|| async {
                let fabric = EventFabric::new();
                publish_batch(&fabric, "bench-build", size).await;
            });
        });
    }

    group.finish();
}

fn event_fabric_fanout(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("event_fabric_fanout");

    for &subscribers in &[1usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &subscribers, |b, &count| {
            b.to_async(&runtime).iter(|| async move {
                let fabric = EventFabric::new();
                fabric
                    .publish("bench-build", EventEnvelope::pipeline_update("bench-build", "RUNNING", "seed"))
                    .await
                    .expect("seed publish");
                let mut streams = Vec::with_capacity(count);
                for _ in 0..count {
                    let (_, stream) = fabric
                        .subscribe("bench-build", "token", &buildforge::event_fabric::AllowAll, true)
                        .await
                        .expect("subscribe");
                    streams.push(stream);
                }
                for i in 0..64 {
                    fabric
                        .publish("bench-build", EventEnvelope::stage_update("bench-build", "coding_file", "RUNNING", format!("event-{i}")))
                        .await
                        .expect("publish");
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, event_fabric_publish, event_fabric_fanout);
criterion_main!(benches);
