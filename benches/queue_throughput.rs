//! Benchmarks for queue and router operations
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use explorer_pool::pool::{JobQueue, ResultRouter};
use explorer_pool::{Job, JobId, Origin, ResultChunk};
use serde_json::json;
use std::sync::Arc;

/// Origin that discards everything
struct NullOrigin;

impl Origin for NullOrigin {
    fn send(&self, chunk: ResultChunk) {
        black_box(chunk);
    }
}

fn filled_queue(size: usize) -> JobQueue {
    let mut queue = JobQueue::new();
    for i in 0..size {
        let priority = ((i * 7919) % 256) as i64;
        queue
            .insert(Job::new(i as JobId, "get_blame").with_priority(priority))
            .unwrap();
    }
    queue
}

fn bench_queue_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_insert");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(filled_queue(size)));
        });
    }

    group.finish();
}

fn bench_queue_drain_in_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_pop_highest");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_queue(size),
                |mut queue| {
                    while let Some(job) = queue.pop_highest() {
                        queue.complete(job.id);
                        black_box(job);
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_reprioritize(c: &mut Criterion) {
    let mut queue = filled_queue(10_000);
    let mut i: u64 = 0;

    c.bench_function("queue_reprioritize_10k", |b| {
        b.iter(|| {
            i = (i + 4_001) % 10_000;
            black_box(queue.reprioritize(i, (i % 97) as i64));
        });
    });
}

fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");
    let chunks_per_job = 64;
    group.throughput(Throughput::Elements(chunks_per_job as u64));

    group.bench_function("route_stream", |b| {
        let origin: Arc<dyn Origin> = Arc::new(NullOrigin);
        b.iter(|| {
            let mut router = ResultRouter::new();
            router.bind(1, origin.clone()).unwrap();
            for n in 0..chunks_per_job - 1 {
                if let Some(delivery) = router.route(ResultChunk::partial(1, json!(n))) {
                    delivery.run();
                }
            }
            if let Some(delivery) = router.route(ResultChunk::complete(1, json!(null))) {
                black_box(delivery.outcome());
                delivery.run();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_insert,
    bench_queue_drain_in_order,
    bench_reprioritize,
    bench_router
);
criterion_main!(benches);
