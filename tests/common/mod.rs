//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_dispatch::batch::{BatchOrchestrator, BatchStatusReport};
use fleet_dispatch::config::DispatchConfig;
use fleet_dispatch::executor::{ActionRequest, ExecutorError, ExecutorRegistry, TargetExecutor};
use fleet_dispatch::inventory::{StaticInventory, Target, Transport};
use chrono::{DateTime, Utc};
use fleet_dispatch::model::{BatchExecution, Execution, ExecutionResult, ExecutionStatus};
use fleet_dispatch::repository::{
    ExecutionFilter, ExecutionRepository, InMemoryExecutionRepository, RepositoryError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Executor whose runs block until the test releases them
///
/// Tracks how many runs started and the peak number running at once.
#[derive(Default)]
pub struct ControlledExecutor {
    gate: Option<Arc<Semaphore>>,
    failing: HashSet<String>,
    ignore_cancel: bool,
    started: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ControlledExecutor {
    /// Runs finish immediately
    pub fn open() -> Self {
        Self::default()
    }

    /// Runs wait for [`ControlledExecutor::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        }
    }

    /// Runs against these targets exit with code 1
    pub fn failing_on<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Keep running after a cancellation signal
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// Let `count` blocked runs finish
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl TargetExecutor for ControlledExecutor {
    async fn execute(
        &self,
        request: ActionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = if self.ignore_cancel {
            self.wait_for_gate().await;
            Ok(())
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                _ = self.wait_for_gate() => Ok(()),
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        if self.failing.contains(&request.target.id) {
            Ok(ExecutionResult::from_exit(1, "", format!("{} failed", request.target.id)))
        } else {
            Ok(ExecutionResult::from_exit(0, format!("{} ok", request.target.id), ""))
        }
    }
}

/// Target id for fixture node `index`
pub fn node_id(index: usize) -> String {
    format!("node-{:04}", index)
}

/// Inventory of `count` ssh nodes
///
/// Group `web` holds nodes 0..3 and group `db` holds nodes 2..5 (where they
/// exist), so the two overlap on nodes 2 and 3.
pub fn fixture_inventory(count: usize) -> StaticInventory {
    let inventory = (0..count).fold(StaticInventory::new(), |inventory, index| {
        let id = node_id(index);
        inventory.with_target(Target::new(
            id.clone(),
            format!("{}.example.internal", id),
            Transport::Ssh,
        ))
    });
    inventory
        .with_group("web", (0..4).map(node_id))
        .with_group("db", (2..6).map(node_id))
}

/// Orchestrator wired to an in-memory repository and `executor` for ssh
pub fn orchestrator(
    nodes: usize,
    executor: Arc<ControlledExecutor>,
    config: DispatchConfig,
) -> (BatchOrchestrator, InMemoryExecutionRepository) {
    let repository = InMemoryExecutionRepository::new();
    let orchestrator = BatchOrchestrator::new(
        Arc::new(repository.clone()),
        Arc::new(fixture_inventory(nodes)),
        ExecutorRegistry::new().register(Transport::Ssh, executor),
        config,
    )
    .expect("fixture config should be valid");
    (orchestrator, repository)
}

/// Orchestrator over any repository, with `executor` for ssh
pub fn orchestrator_with_repository(
    nodes: usize,
    executor: Arc<ControlledExecutor>,
    config: DispatchConfig,
    repository: Arc<dyn ExecutionRepository>,
) -> BatchOrchestrator {
    BatchOrchestrator::new(
        repository,
        Arc::new(fixture_inventory(nodes)),
        ExecutorRegistry::new().register(Transport::Ssh, executor),
        config,
    )
    .expect("fixture config should be valid")
}

/// In-memory repository whose next few updates to a given status fail
pub struct FlakyRepository {
    inner: InMemoryExecutionRepository,
    failing_status: ExecutionStatus,
    failures_left: AtomicUsize,
}

impl FlakyRepository {
    /// Fail the next `count` updates that write `status`
    pub fn failing_updates(status: ExecutionStatus, count: usize) -> Self {
        Self {
            inner: InMemoryExecutionRepository::new(),
            failing_status: status,
            failures_left: AtomicUsize::new(count),
        }
    }

    /// Updates still due to fail
    pub fn failures_left(&self) -> usize {
        self.failures_left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionRepository for FlakyRepository {
    async fn insert_batch(
        &self,
        batch: &BatchExecution,
        executions: &[Execution],
    ) -> Result<(), RepositoryError> {
        self.inner.insert_batch(batch, executions).await
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.inner.insert_execution(execution).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, RepositoryError> {
        self.inner.get_execution(id).await
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        if execution.status == self.failing_status
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(RepositoryError::Storage("transient write failure".to_string()));
        }
        self.inner.update_execution(execution).await
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        self.inner.list_executions(filter).await
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchExecution>, RepositoryError> {
        self.inner.get_batch(id).await
    }

    async fn list_batch_executions(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<Execution>, RepositoryError> {
        self.inner.list_batch_executions(batch_id).await
    }

    async fn mark_batch_cancel_requested(
        &self,
        batch_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.inner.mark_batch_cancel_requested(batch_id, at).await
    }

    async fn list_batches(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<BatchExecution>, RepositoryError> {
        self.inner.list_batches(user_id, limit).await
    }
}

/// Poll until `condition` holds, panicking after about two seconds
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", description);
}

/// Poll a batch until `condition` holds for its status report
pub async fn wait_for_batch<F>(
    orchestrator: &BatchOrchestrator,
    batch_id: Uuid,
    mut condition: F,
) -> BatchStatusReport
where
    F: FnMut(&BatchStatusReport) -> bool,
{
    for _ in 0..400 {
        let report = orchestrator
            .get_batch_status(batch_id, None)
            .await
            .expect("batch should exist");
        if condition(&report) {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting on batch {}", batch_id);
}
