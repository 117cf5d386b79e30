//! Per-transport executors that perform an action against one target
//!
//! The queue never looks at transports. The orchestrator picks the executor
//! for each target from an [`ExecutorRegistry`] and hands the queue a ticket
//! that already knows which executor to call.

mod local;

pub use local::LocalCommandExecutor;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::inventory::{Target, Transport};
use crate::model::{ExecutionResult, ExecutionType, Parameters};

/// Errors reported by an executor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// Stopped early after a cancellation signal
    #[error("cancelled while running")]
    Cancelled,

    /// Could not connect to the target
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// Gave up after the executor's own deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Action type this executor cannot run
    #[error("{0} actions are not supported by this executor")]
    Unsupported(ExecutionType),

    /// Any other executor failure
    #[error("execution failed: {0}")]
    Failed(String),
}

/// Everything an executor needs to run one action
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Target to act on
    pub target: Target,
    /// Command, task or plan
    pub execution_type: ExecutionType,
    /// Command string or task/plan name
    pub action: String,
    /// Opaque parameters
    pub parameters: Parameters,
}

/// Performs an action against one target
///
/// Implementations should watch `cancel` and return
/// [`ExecutorError::Cancelled`] when they stop early; ignoring it is allowed.
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    /// Run the action to completion
    async fn execute(
        &self,
        request: ActionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError>;
}

/// Executors keyed by transport
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Transport, Arc<dyn TargetExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor used for `transport`
    pub fn register(mut self, transport: Transport, executor: Arc<dyn TargetExecutor>) -> Self {
        self.executors.insert(transport, executor);
        self
    }

    /// Executor for `transport`, if one is registered
    pub fn resolve(&self, transport: &Transport) -> Option<Arc<dyn TargetExecutor>> {
        self.executors.get(transport).cloned()
    }

    /// Whether `transport` has an executor
    pub fn supports(&self, transport: &Transport) -> bool {
        self.executors.contains_key(transport)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut transports: Vec<String> = self.executors.keys().map(|t| t.to_string()).collect();
        transports.sort();
        f.debug_struct("ExecutorRegistry")
            .field("transports", &transports)
            .finish()
    }
}
