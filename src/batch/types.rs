//! Request, response and validation types for batch operations

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::inventory::Transport;
use crate::model::{BatchExecution, Execution, ExecutionType, Parameters};

/// Request to run one action against a set of targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Explicit target ids
    #[serde(default)]
    pub target_ids: Vec<String>,
    /// Groups whose members are added to the target set
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Command, task or plan
    #[serde(rename = "type")]
    pub execution_type: ExecutionType,
    /// Command string or task/plan name
    pub action: String,
    /// Executor parameters
    #[serde(default)]
    pub parameters: Parameters,
}

impl BatchRequest {
    /// Create a request with no targets
    pub fn new(execution_type: ExecutionType, action: impl Into<String>) -> Self {
        Self {
            target_ids: Vec::new(),
            group_ids: Vec::new(),
            execution_type,
            action: action.into(),
            parameters: Parameters::new(),
        }
    }

    /// Add explicit targets
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_ids.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Add groups to expand
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Set one parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Request to run one action against a single target, outside any batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Target id
    pub target_id: String,
    /// Command, task or plan
    #[serde(rename = "type")]
    pub execution_type: ExecutionType,
    /// Command string or task/plan name
    pub action: String,
    /// Executor parameters
    #[serde(default)]
    pub parameters: Parameters,
}

impl ExecutionRequest {
    /// Create a request
    pub fn new(
        target_id: impl Into<String>,
        execution_type: ExecutionType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            execution_type,
            action: action.into(),
            parameters: Parameters::new(),
        }
    }
}

/// Response to a successful `create_batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCreated {
    /// New batch id
    pub batch_id: Uuid,
    /// Member execution ids, ordered by batch position
    pub execution_ids: Vec<Uuid>,
    /// Number of distinct targets
    pub target_count: usize,
    /// Target ids contributed by group expansion
    pub expanded_node_ids: Vec<String>,
    /// Group ids that did not resolve and were skipped
    pub unresolved_groups: Vec<String>,
}

/// Point-in-time batch view with recomputed stats and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    /// Batch record with derived fields filled in
    pub batch: BatchExecution,
    /// Member executions, ordered by position, optionally filtered by status
    pub executions: Vec<Execution>,
    /// Finished share of the batch, 0..=100
    pub progress_percent: u8,
}

/// Request-level validation failures, raised before anything is persisted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Blank action
    #[error("action must not be empty")]
    EmptyAction,

    /// Nothing left to run after expansion
    #[error("request resolves to no targets")]
    NoTargets,

    /// Targets missing from inventory
    #[error("unknown targets: {}", .0.join(", "))]
    UnknownTargets(Vec<String>),

    /// Expanded target set over the configured limit
    #[error("batch of {count} targets exceeds the maximum of {max}")]
    BatchTooLarge {
        /// Distinct targets requested
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// Targets reached through a transport with no registered executor
    #[error("no executor for transport {transport} (targets: {})", .targets.join(", "))]
    UnsupportedTransport {
        /// Transport lacking an executor
        transport: Transport,
        /// Targets using it
        targets: Vec<String>,
    },
}

impl ValidationError {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyAction => "empty_action",
            ValidationError::NoTargets => "no_targets",
            ValidationError::UnknownTargets(_) => "unknown_targets",
            ValidationError::BatchTooLarge { .. } => "too_large",
            ValidationError::UnsupportedTransport { .. } => "unsupported_transport",
        }
    }
}
