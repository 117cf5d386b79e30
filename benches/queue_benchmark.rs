use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleet_dispatch::batch::{dedup_targets, BatchOrchestrator, BatchRequest};
use fleet_dispatch::config::DispatchConfig;
use fleet_dispatch::executor::{ActionRequest, ExecutorError, ExecutorRegistry, TargetExecutor};
use fleet_dispatch::inventory::{StaticInventory, Target, Transport};
use fleet_dispatch::model::{ExecutionResult, ExecutionType};
use fleet_dispatch::queue::{ExecutionQueue, Ticket};
use fleet_dispatch::repository::InMemoryExecutionRepository;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct NoopExecutor;

#[async_trait::async_trait]
impl TargetExecutor for NoopExecutor {
    async fn execute(
        &self,
        _request: ActionRequest,
        _cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        Ok(ExecutionResult::from_exit(0, "", ""))
    }
}

fn benchmark_queue_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_throughput");

    for limit in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = ExecutionQueue::new(limit, None);
                    let handles: Vec<_> = (0..256)
                        .map(|i| {
                            let ticket = Ticket::new(Uuid::new_v4(), format!("t{}", i), |_cancel| async {
                                Ok(ExecutionResult::default())
                            });
                            queue.enqueue(ticket).unwrap()
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.wait().await);
                    }
                })
            })
        });
    }
    group.finish();
}

fn benchmark_dedup(c: &mut Criterion) {
    let ids: Vec<String> = (0..5000).map(|i| format!("node-{}", i % 1000)).collect();

    c.bench_function("dedup_5000_targets", |b| {
        b.iter(|| dedup_targets(black_box(ids.clone())))
    });
}

fn benchmark_create_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let inventory = (0..500).fold(StaticInventory::new(), |inventory, i| {
        let id = format!("node-{:03}", i);
        inventory.with_target(Target::new(id.clone(), id, Transport::Ssh))
    });
    let inventory = Arc::new(inventory.with_group("all", (0..500).map(|i| format!("node-{:03}", i))));

    c.bench_function("create_batch_500_targets", |b| {
        b.iter(|| {
            rt.block_on(async {
                let orchestrator = BatchOrchestrator::new(
                    Arc::new(InMemoryExecutionRepository::new()),
                    inventory.clone(),
                    ExecutorRegistry::new().register(Transport::Ssh, Arc::new(NoopExecutor)),
                    DispatchConfig::default().with_concurrency_limit(16),
                )
                .unwrap();
                let request = BatchRequest::new(ExecutionType::Command, "true").with_groups(["all"]);
                black_box(orchestrator.create_batch(request, "bench").await.unwrap())
            })
        })
    });
}

criterion_group!(
    benches,
    benchmark_queue_throughput,
    benchmark_dedup,
    benchmark_create_batch
);

criterion_main!(benches);
