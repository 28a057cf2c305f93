use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use marketdesk_content::Post;
use marketdesk_infra::repositories::{InMemoryPostRepository, PostRepository};
use marketdesk_infra::tasks::{EnqueueOptions, InMemoryTaskQueue, TaskQueue, TaskSource};
use marketdesk_infra::workflows::ScheduledPostPublisher;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

/// Enqueue N ready tasks, then claim and complete all of them.
fn bench_enqueue_claim_complete(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("in_memory_queue");

    for size in [100usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("enqueue_claim_complete", size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = InMemoryTaskQueue::new();
                    for i in 0..size {
                        queue
                            .enqueue("bench", "noop", serde_json::json!({ "i": i }), EnqueueOptions::default())
                            .await
                            .unwrap();
                    }
                    while let Some(mut task) = queue.claim_next("bench").await.unwrap() {
                        queue.complete(&mut task).await.unwrap();
                    }
                    black_box(queue.stats("bench").unwrap())
                })
            });
        });
    }

    group.finish();
}

/// Claim latency with a backlog of delayed tasks that are not yet eligible.
fn bench_claim_with_delayed_backlog(c: &mut Criterion) {
    let rt = runtime();
    let queue = InMemoryTaskQueue::new();
    rt.block_on(async {
        for _ in 0..5_000 {
            queue
                .enqueue("bench", "noop", serde_json::json!({}), EnqueueOptions::delayed(Duration::from_secs(1200)))
                .await
                .unwrap();
        }
    });

    c.bench_function("claim_next_with_5000_delayed", |b| {
        b.iter(|| rt.block_on(async { black_box(queue.claim_next("bench").await.unwrap()) }))
    });
}

fn bench_publisher_sweep(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publisher_sweep");

    for size in [100usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("due_posts", size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let now = Utc::now();
                    let posts = Arc::new(InMemoryPostRepository::new());
                    for i in 0..size {
                        let post = Post::schedule(format!("post {i}"), &["facebook", "x"], now, now).unwrap();
                        posts.insert(&post).await.unwrap();
                    }
                    let publisher = ScheduledPostPublisher::new(posts);
                    black_box(publisher.sweep().await.unwrap())
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_enqueue_claim_complete,
    bench_claim_with_delayed_backlog,
    bench_publisher_sweep
);
criterion_main!(benches);
