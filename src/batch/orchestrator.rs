//! Batch orchestrator
//!
//! Turns requests into persisted, queued executions and exposes aggregated
//! status and cancellation over them. The orchestrator owns record creation;
//! the queue only reports transitions back through a ticket listener.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::aggregation::aggregate;
use super::expansion::expand_targets;
use super::types::{
    BatchCreated, BatchRequest, BatchStatusReport, ExecutionRequest, ValidationError,
};
use crate::config::DispatchConfig;
use crate::executor::{ActionRequest, ExecutorRegistry, TargetExecutor};
use crate::inventory::{Inventory, Target, Transport};
use crate::metrics::DispatchMetrics;
use crate::model::{BatchExecution, Execution, ExecutionStatus};
use crate::queue::{
    CancelOutcome, ExecutionQueue, QueueError, QueueStatus, Ticket, TicketListener, TicketOutcome,
    TicketReport,
};
use crate::repository::{ExecutionFilter, ExecutionRepository};
use crate::{DispatchError, Result};

/// Records queue transitions on the execution records
struct RepositoryRecorder {
    repository: Arc<dyn ExecutionRepository>,
}

impl RepositoryRecorder {
    async fn load(&self, execution_id: Uuid) -> Option<Execution> {
        match self.repository.get_execution(execution_id).await {
            Ok(Some(execution)) => Some(execution),
            Ok(None) => {
                warn!(execution_id = %execution_id, "Execution record missing, transition dropped");
                None
            }
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to load execution record");
                None
            }
        }
    }

    async fn store(&self, execution: &Execution) {
        if let Err(e) = self.repository.update_execution(execution).await {
            warn!(execution_id = %execution.id, error = %e, "Failed to record execution transition");
        }
    }
}

#[async_trait]
impl TicketListener for RepositoryRecorder {
    async fn on_started(&self, execution_id: Uuid, started_at: DateTime<Utc>) {
        let Some(mut execution) = self.load(execution_id).await else {
            return;
        };
        match execution.mark_running(started_at) {
            Ok(()) => self.store(&execution).await,
            Err(e) => warn!(error = %e, "Rejected start transition"),
        }
    }

    async fn on_finished(&self, report: &TicketReport) {
        let Some(mut execution) = self.load(report.execution_id).await else {
            return;
        };

        let transition = match &report.outcome {
            TicketOutcome::Success(result) => execution.mark_finished(
                ExecutionStatus::Success,
                report.started_at,
                report.finished_at,
                Some(result.clone()),
                None,
            ),
            TicketOutcome::Failed { error, result } => execution.mark_finished(
                ExecutionStatus::Failed,
                report.started_at,
                report.finished_at,
                result.clone(),
                Some(error.clone()),
            ),
            // Only tickets dequeued before dispatch end cancelled, and those
            // are recorded by whoever dequeued them.
            TicketOutcome::Cancelled => {
                debug!(execution_id = %execution.id, "Cancelled outcome already recorded");
                return;
            }
        };

        match transition {
            Ok(()) => {
                info!(
                    execution_id = %execution.id,
                    target = %execution.target_id,
                    status = %execution.status,
                    batch_id = ?execution.batch_id,
                    "Execution finished"
                );
                self.store(&execution).await;
            }
            Err(e) => warn!(error = %e, "Rejected terminal transition"),
        }
    }
}

/// Creates, tracks and cancels batches of executions
pub struct BatchOrchestrator {
    repository: Arc<dyn ExecutionRepository>,
    inventory: Arc<dyn Inventory>,
    executors: ExecutorRegistry,
    queue: ExecutionQueue,
    recorder: Arc<RepositoryRecorder>,
    config: DispatchConfig,
}

impl BatchOrchestrator {
    /// Create an orchestrator with its own queue built from `config`
    pub fn new(
        repository: Arc<dyn ExecutionRepository>,
        inventory: Arc<dyn Inventory>,
        executors: ExecutorRegistry,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let recorder = Arc::new(RepositoryRecorder {
            repository: repository.clone(),
        });
        Ok(Self {
            repository,
            inventory,
            executors,
            queue: ExecutionQueue::from_config(&config),
            recorder,
            config,
        })
    }

    /// Dispatch through an existing queue, shared with other callers
    pub fn with_queue(mut self, queue: ExecutionQueue) -> Self {
        self.queue = queue;
        self
    }

    /// Queue used for dispatch
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Active configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Snapshot of the shared queue
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    fn reject(&self, error: ValidationError) -> DispatchError {
        DispatchMetrics::record_batch_rejection(error.reason());
        warn!(reason = error.reason(), error = %error, "Request rejected");
        error.into()
    }

    /// Look up every target, failing with the full list of unknown ids
    async fn resolve_targets(&self, target_ids: &[String]) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(target_ids.len());
        let mut unknown = Vec::new();
        for target_id in target_ids {
            match self.inventory.get_target(target_id).await? {
                Some(target) => targets.push(target),
                None => unknown.push(target_id.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(self.reject(ValidationError::UnknownTargets(unknown)));
        }
        Ok(targets)
    }

    /// Pair each target with its executor, failing on the first transport without one
    fn assign_executors(
        &self,
        targets: Vec<Target>,
    ) -> Result<Vec<(Target, Arc<dyn TargetExecutor>)>> {
        let mut unsupported: Vec<(Transport, Vec<String>)> = Vec::new();
        let mut assigned = Vec::with_capacity(targets.len());

        for target in targets {
            match self.executors.resolve(&target.transport) {
                Some(executor) => assigned.push((target, executor)),
                None => match unsupported.iter_mut().find(|(t, _)| *t == target.transport) {
                    Some((_, ids)) => ids.push(target.id),
                    None => unsupported.push((target.transport, vec![target.id])),
                },
            }
        }

        match unsupported.into_iter().next() {
            Some((transport, targets)) => Err(self.reject(ValidationError::UnsupportedTransport {
                transport,
                targets,
            })),
            None => Ok(assigned),
        }
    }

    fn ensure_capacity(&self, needed: usize) -> Result<()> {
        match self.queue.remaining_capacity() {
            Some(remaining) if remaining < needed => {
                DispatchMetrics::record_batch_rejection("queue_full");
                let max = self.queue.max_waiting().unwrap_or(0);
                warn!(needed, remaining, "Queue cannot admit request");
                Err(QueueError::QueueFull { max }.into())
            }
            _ => Ok(()),
        }
    }

    fn ticket(
        &self,
        execution: &Execution,
        target: Target,
        executor: Arc<dyn TargetExecutor>,
    ) -> Ticket {
        let request = ActionRequest {
            target,
            execution_type: execution.execution_type,
            action: execution.action.clone(),
            parameters: execution.parameters.clone(),
        };
        Ticket::new(execution.id, execution.target_id.clone(), move |cancel| async move {
            executor.execute(request, cancel).await
        })
        .with_listener(self.recorder.clone())
    }

    /// Admit a persisted execution; an admission loss is recorded on the execution
    ///
    /// Never fails: a lost admission whose record cannot be written is logged
    /// so the caller can go on admitting siblings.
    async fn admit(&self, execution: &Execution, ticket: Ticket) {
        let error = match self.queue.enqueue(ticket) {
            Ok(_handle) => return,
            Err(e) => e,
        };

        warn!(execution_id = %execution.id, error = %error, "Admission failed after persistence");
        DispatchMetrics::record_outcome("failed");
        let now = Utc::now();
        let mut failed = execution.clone();
        let recorded = match failed.mark_finished(
            ExecutionStatus::Failed,
            now,
            now,
            None,
            Some(error.to_string()),
        ) {
            Ok(()) => self.repository.update_execution(&failed).await.map_err(DispatchError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = recorded {
            warn!(execution_id = %execution.id, error = %e, "Failed to record lost admission");
        }
    }

    /// Mark a still-queued record cancelled
    ///
    /// Returns `false` when the record already left `queued`.
    async fn record_cancelled(&self, execution_id: Uuid) -> Result<bool> {
        let mut execution = self
            .repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("execution {}", execution_id)))?;
        if execution.status != ExecutionStatus::Queued {
            return Ok(false);
        }
        execution.mark_cancelled(Utc::now())?;
        self.repository.update_execution(&execution).await?;
        Ok(true)
    }

    /// Cancel one execution through the queue and record what happened
    ///
    /// A queued record the queue no longer knows can never run, so it is
    /// cancelled on the spot. This also repairs a record whose earlier
    /// cancellation write failed.
    async fn cancel_one(&self, execution_id: Uuid) -> CancelOutcome {
        match self.queue.cancel(execution_id) {
            CancelOutcome::Dequeued => {
                if let Err(e) = self.record_cancelled(execution_id).await {
                    warn!(execution_id = %execution_id, error = %e, "Failed to record cancellation");
                }
                CancelOutcome::Dequeued
            }
            CancelOutcome::Signalled => CancelOutcome::Signalled,
            CancelOutcome::NotFound => match self.record_cancelled(execution_id).await {
                Ok(true) => {
                    info!(execution_id = %execution_id, "Stranded queued record cancelled");
                    CancelOutcome::Dequeued
                }
                Ok(false) => {
                    debug!(execution_id = %execution_id, "Execution finished before it could be cancelled");
                    CancelOutcome::NotFound
                }
                Err(e) => {
                    warn!(execution_id = %execution_id, error = %e, "Failed to cancel stranded record");
                    CancelOutcome::NotFound
                }
            },
        }
    }

    /// Create a batch and queue one execution per distinct target
    ///
    /// Returns once every execution is admitted. Validation failures are
    /// raised before anything is persisted.
    #[instrument(
        skip(self, request),
        fields(action = %request.action, execution_type = %request.execution_type)
    )]
    pub async fn create_batch(&self, request: BatchRequest, user_id: &str) -> Result<BatchCreated> {
        if request.action.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyAction));
        }

        let expanded =
            expand_targets(self.inventory.as_ref(), &request.target_ids, &request.group_ids).await;
        if expanded.target_ids.is_empty() {
            return Err(self.reject(ValidationError::NoTargets));
        }
        if expanded.target_ids.len() > self.config.max_batch_size {
            return Err(self.reject(ValidationError::BatchTooLarge {
                count: expanded.target_ids.len(),
                max: self.config.max_batch_size,
            }));
        }

        let targets = self.resolve_targets(&expanded.target_ids).await?;
        let assigned = self.assign_executors(targets)?;
        self.ensure_capacity(assigned.len())?;

        let executions: Vec<Execution> = assigned
            .iter()
            .map(|(target, _)| {
                Execution::new(
                    request.execution_type,
                    target.id.clone(),
                    request.action.clone(),
                    request.parameters.clone(),
                    user_id,
                )
            })
            .collect();
        let execution_ids: Vec<Uuid> = executions.iter().map(|e| e.id).collect();

        let batch = BatchExecution::new(
            request.execution_type,
            request.action.clone(),
            request.parameters.clone(),
            expanded.target_ids.clone(),
            request.group_ids.clone(),
            user_id,
            execution_ids.clone(),
        );
        let executions: Vec<Execution> = executions
            .into_iter()
            .enumerate()
            .map(|(position, execution)| execution.in_batch(batch.id, position))
            .collect();

        self.repository.insert_batch(&batch, &executions).await?;
        DispatchMetrics::record_batch_created();
        info!(
            batch_id = %batch.id,
            user_id = %user_id,
            target_count = executions.len(),
            unresolved_groups = expanded.unresolved_groups.len(),
            "Batch created"
        );

        for (execution, (target, executor)) in executions.iter().zip(assigned) {
            let ticket = self.ticket(execution, target, executor);
            self.admit(execution, ticket).await;
        }
        debug!(batch_id = %batch.id, "All batch tickets admitted");

        Ok(BatchCreated {
            batch_id: batch.id,
            target_count: execution_ids.len(),
            execution_ids,
            expanded_node_ids: expanded.group_members,
            unresolved_groups: expanded.unresolved_groups,
        })
    }

    /// Read a batch with stats and status recomputed from its executions
    ///
    /// `status_filter` narrows the returned executions only; stats always
    /// cover the whole batch.
    #[instrument(skip(self))]
    pub async fn get_batch_status(
        &self,
        batch_id: Uuid,
        status_filter: Option<ExecutionStatus>,
    ) -> Result<BatchStatusReport> {
        let batch = self.load_batch(batch_id).await?;
        let executions = self.repository.list_batch_executions(batch_id).await?;
        let batch = aggregate(batch, &executions);
        let progress_percent = batch.stats.progress_percent();

        let executions = match status_filter {
            Some(status) => executions.into_iter().filter(|e| e.status == status).collect(),
            None => executions,
        };

        Ok(BatchStatusReport {
            batch,
            executions,
            progress_percent,
        })
    }

    async fn load_batch(&self, batch_id: Uuid) -> Result<BatchExecution> {
        self.repository
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("batch {}", batch_id)))
    }

    /// Cancel every execution of a batch that has not finished
    ///
    /// Waiting executions are cancelled for certain and counted. Running ones
    /// only receive a signal and are not counted. A record that cannot be
    /// written is logged and still counted, since its ticket is gone from the
    /// queue; calling again retries the write.
    #[instrument(skip(self))]
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<usize> {
        self.load_batch(batch_id).await?;
        let executions = self.repository.list_batch_executions(batch_id).await?;

        // Waiting executions go first so signalled ones that stop early cannot
        // promote a sibling into the freed slot.
        let (queued, running): (Vec<&Execution>, Vec<&Execution>) = executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .partition(|e| e.status == ExecutionStatus::Queued);

        let mut cancelled = 0;
        let mut signalled = 0;
        for execution in queued.into_iter().chain(running) {
            match self.cancel_one(execution.id).await {
                CancelOutcome::Dequeued => cancelled += 1,
                CancelOutcome::Signalled => signalled += 1,
                CancelOutcome::NotFound => {}
            }
        }

        // Earlier cancelled records mean a previous request already went
        // through, so a retry still marks the batch.
        let cancelled_before = executions
            .iter()
            .any(|e| e.status == ExecutionStatus::Cancelled);
        if cancelled + signalled > 0 || cancelled_before {
            self.repository
                .mark_batch_cancel_requested(batch_id, Utc::now())
                .await?;
        }
        info!(batch_id = %batch_id, cancelled, signalled, "Batch cancellation requested");
        Ok(cancelled)
    }

    /// Queue one execution outside any batch
    #[instrument(skip(self, request), fields(target = %request.target_id, action = %request.action))]
    pub async fn submit_execution(
        &self,
        request: ExecutionRequest,
        user_id: &str,
    ) -> Result<Execution> {
        if request.action.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyAction));
        }

        let targets = self.resolve_targets(std::slice::from_ref(&request.target_id)).await?;
        let mut assigned = self.assign_executors(targets)?;
        self.ensure_capacity(1)?;
        let Some((target, executor)) = assigned.pop() else {
            return Err(self.reject(ValidationError::NoTargets));
        };

        let execution = Execution::new(
            request.execution_type,
            target.id.clone(),
            request.action,
            request.parameters,
            user_id,
        );
        self.repository.insert_execution(&execution).await?;
        info!(execution_id = %execution.id, target = %execution.target_id, "Execution submitted");

        let ticket = self.ticket(&execution, target, executor);
        self.admit(&execution, ticket).await;
        Ok(execution)
    }

    /// Load one execution record
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        self.repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("execution {}", execution_id)))
    }

    /// Cancel one execution, batch member or standalone
    #[instrument(skip(self))]
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<CancelOutcome> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(CancelOutcome::NotFound);
        }

        let outcome = self.cancel_one(execution_id).await;
        info!(execution_id = %execution_id, outcome = ?outcome, "Execution cancellation requested");
        Ok(outcome)
    }

    /// List batches newest first, with derived fields recomputed
    pub async fn list_batches(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<BatchExecution>> {
        let batches = self.repository.list_batches(user_id, limit).await?;
        let mut summaries = Vec::with_capacity(batches.len());
        for batch in batches {
            let executions = self.repository.list_batch_executions(batch.id).await?;
            summaries.push(aggregate(batch, &executions));
        }
        Ok(summaries)
    }

    /// List executions newest first
    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        Ok(self.repository.list_executions(filter).await?)
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("executors", &self.executors)
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}
