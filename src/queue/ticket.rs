//! Admission tickets and their outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::ExecutorError;
use crate::model::{ExecutionResult, ExecutionStatus};

/// Work a ticket runs once it holds a slot
pub type TicketWork = Box<
    dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<ExecutionResult, ExecutorError>>
        + Send,
>;

/// Receives the lifecycle transitions of dispatched tickets
///
/// Tickets removed from the waiting list by a cancel are never reported here.
#[async_trait]
pub trait TicketListener: Send + Sync {
    /// The ticket took a slot and its work is about to run
    async fn on_started(&self, execution_id: Uuid, started_at: DateTime<Utc>);

    /// The ticket's work reached a terminal outcome; its slot is still held
    async fn on_finished(&self, report: &TicketReport);
}

/// Admission handle for one execution
pub struct Ticket {
    pub(crate) execution_id: Uuid,
    pub(crate) target_id: String,
    pub(crate) work: TicketWork,
    pub(crate) listener: Option<Arc<dyn TicketListener>>,
    pub(crate) cancel: CancellationToken,
}

impl Ticket {
    /// Create a ticket running `work` against `target_id`
    pub fn new<F, Fut>(execution_id: Uuid, target_id: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ExecutionResult, ExecutorError>> + Send + 'static,
    {
        Self {
            execution_id,
            target_id: target_id.into(),
            work: Box::new(move |cancel| work(cancel).boxed()),
            listener: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report transitions to `listener`
    pub fn with_listener(mut self, listener: Arc<dyn TicketListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Execution this ticket admits
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Target the work runs against
    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("execution_id", &self.execution_id)
            .field("target_id", &self.target_id)
            .field("listener", &self.listener.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Terminal outcome of a ticket
#[derive(Debug, Clone, PartialEq)]
pub enum TicketOutcome {
    /// The executor reported success
    Success(ExecutionResult),
    /// The executor errored, panicked, exited non-zero or stopped on cancel
    Failed {
        /// Failure reason
        error: String,
        /// Output, when the executor produced any
        result: Option<ExecutionResult>,
    },
    /// Removed from the waiting list before it took a slot
    Cancelled,
}

impl TicketOutcome {
    /// Classify what an executor returned
    pub fn from_execution(result: Result<ExecutionResult, ExecutorError>) -> Self {
        match result {
            Ok(result) if result.is_success() => TicketOutcome::Success(result),
            Ok(result) => TicketOutcome::Failed {
                error: format!("exited with code {}", result.exit_code.unwrap_or(-1)),
                result: Some(result),
            },
            Err(e) => TicketOutcome::Failed {
                error: e.to_string(),
                result: None,
            },
        }
    }

    /// Execution status this outcome maps to
    pub fn status(&self) -> ExecutionStatus {
        match self {
            TicketOutcome::Success(_) => ExecutionStatus::Success,
            TicketOutcome::Failed { .. } => ExecutionStatus::Failed,
            TicketOutcome::Cancelled => ExecutionStatus::Cancelled,
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            TicketOutcome::Success(_) => "success",
            TicketOutcome::Failed { .. } => "failed",
            TicketOutcome::Cancelled => "cancelled",
        }
    }
}

/// What happened to a dispatched ticket
#[derive(Debug, Clone)]
pub struct TicketReport {
    /// Execution the ticket admitted
    pub execution_id: Uuid,
    /// Terminal outcome
    pub outcome: TicketOutcome,
    /// When the slot was granted
    pub started_at: DateTime<Utc>,
    /// When the work finished
    pub finished_at: DateTime<Utc>,
}

/// Caller's side of an admitted ticket
#[derive(Debug)]
pub struct TicketHandle {
    pub(crate) execution_id: Uuid,
    pub(crate) receiver: oneshot::Receiver<TicketOutcome>,
}

impl TicketHandle {
    /// Execution this handle tracks
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> TicketOutcome {
        self.receiver.await.unwrap_or_else(|_| TicketOutcome::Failed {
            error: "ticket dropped before reporting an outcome".to_string(),
            result: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let ok = TicketOutcome::from_execution(Ok(ExecutionResult::from_exit(0, "ok", "")));
        assert_eq!(ok.status(), ExecutionStatus::Success);

        let non_zero = TicketOutcome::from_execution(Ok(ExecutionResult::from_exit(4, "", "bad")));
        match &non_zero {
            TicketOutcome::Failed { error, result } => {
                assert_eq!(error, "exited with code 4");
                assert_eq!(result.as_ref().and_then(|r| r.exit_code), Some(4));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let cancelled = TicketOutcome::from_execution(Err(ExecutorError::Cancelled));
        assert_eq!(
            cancelled,
            TicketOutcome::Failed {
                error: "cancelled while running".to_string(),
                result: None,
            }
        );
        assert_eq!(cancelled.label(), "failed");
        assert_eq!(TicketOutcome::Cancelled.status(), ExecutionStatus::Cancelled);
    }

    #[test]
    fn test_ticket_debug_hides_work() {
        let id = Uuid::new_v4();
        let ticket = Ticket::new(id, "db-01", |_cancel| async { Ok(ExecutionResult::default()) });
        let rendered = format!("{:?}", ticket);
        assert!(rendered.contains("db-01"));
        assert!(rendered.contains("listener: false"));
        assert_eq!(ticket.execution_id(), id);
        assert_eq!(ticket.target_id(), "db-01");
    }
}
