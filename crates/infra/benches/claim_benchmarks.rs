use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use chrono::{Duration, Utc};
use claimq_core::{AttemptOutcome, FailurePolicy, JobKind, NewWorkItem};
use claimq_infra::{ClaimCoordinator, InMemoryWorkItemStore, WorkItemStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn seeded(rt: &tokio::runtime::Runtime, count: usize) -> InMemoryWorkItemStore {
    let store = InMemoryWorkItemStore::new();
    rt.block_on(async {
        for i in 0..count {
            store
                .insert(NewWorkItem::new(
                    JobKind::PaymentBot,
                    serde_json::json!({ "n": i }),
                    Utc::now() - Duration::seconds(i as i64),
                ))
                .await
                .unwrap();
        }
    });
    store
}

/// Claim and drop (rollback) a batch of 10 from tables of growing size.
fn bench_claim_batch(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("claim_batch");

    for size in [100usize, 1_000, 10_000] {
        let coordinator = ClaimCoordinator::new(seeded(&rt, size));
        group.throughput(Throughput::Elements(10));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let batch = coordinator
                        .claim_batch(JobKind::PaymentBot, JobKind::PaymentBot.claim_filter(), 10)
                        .await
                        .unwrap();
                    black_box(batch.len())
                })
            });
        });
    }

    group.finish();
}

/// Full claim, record, release cycle over a fresh table.
fn bench_claim_record_release(c: &mut Criterion) {
    let rt = runtime();
    let policy = FailurePolicy::default();

    c.bench_function("claim_record_release_10", |b| {
        b.iter_batched(
            || ClaimCoordinator::new(seeded(&rt, 10)),
            |coordinator| {
                rt.block_on(async {
                    let mut batch = coordinator
                        .claim_batch(JobKind::PaymentBot, JobKind::PaymentBot.claim_filter(), 10)
                        .await
                        .unwrap();
                    let done = AttemptOutcome::Succeeded { next_due_at: None };
                    for mut item in batch.items().to_vec() {
                        policy.record_outcome(&mut item, &done, Utc::now()).unwrap();
                        batch.record(&item).await.unwrap();
                    }
                    batch.release().await.unwrap();
                })
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_claim_batch, bench_claim_record_release);
criterion_main!(benches);
