//! Persistence contract for execution and batch records
//!
//! The orchestrator only reads and writes through [`ExecutionRepository`]; the
//! storage engine behind it is not its concern. [`InMemoryExecutionRepository`]
//! is the reference implementation used by tests and the demo.

mod memory;

pub use memory::InMemoryExecutionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{BatchExecution, Execution, ExecutionStatus};

/// Errors related to persistence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// No record with that id
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record with that id already exists
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// Backend failure
    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Filter for listing executions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    /// Only executions with this status
    pub status: Option<ExecutionStatus>,
    /// Only executions against this target
    pub target_id: Option<String>,
    /// Only members of this batch
    pub batch_id: Option<Uuid>,
    /// Maximum number of records returned
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    /// Whether `execution` passes every set criterion
    pub fn matches(&self, execution: &Execution) -> bool {
        self.status.map_or(true, |s| execution.status == s)
            && self
                .target_id
                .as_deref()
                .map_or(true, |t| execution.target_id == t)
            && self.batch_id.map_or(true, |b| execution.batch_id == Some(b))
    }
}

/// Storage for executions and batches
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Persist a batch together with all of its member executions
    async fn insert_batch(
        &self,
        batch: &BatchExecution,
        executions: &[Execution],
    ) -> Result<(), RepositoryError>;

    /// Persist a standalone execution
    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepositoryError>;

    /// Load one execution
    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, RepositoryError>;

    /// Overwrite an existing execution record
    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError>;

    /// List executions, newest first
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError>;

    /// Load one batch record as stored
    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchExecution>, RepositoryError>;

    /// Load the members of a batch ordered by batch position
    async fn list_batch_executions(&self, batch_id: Uuid)
        -> Result<Vec<Execution>, RepositoryError>;

    /// Record that cancellation was requested for a batch
    async fn mark_batch_cancel_requested(
        &self,
        batch_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// List batches, newest first
    async fn list_batches(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<BatchExecution>, RepositoryError>;
}
