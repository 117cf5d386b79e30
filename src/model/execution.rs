//! Individual execution records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque key-value parameters passed through to the executor
pub type Parameters = HashMap<String, serde_json::Value>;

/// Kind of action an execution performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// Ad-hoc command string
    Command,
    /// Named task with parameters
    Task,
    /// Named plan with parameters
    Plan,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionType::Command => "command",
            ExecutionType::Task => "task",
            ExecutionType::Plan => "plan",
        };
        f.write_str(name)
    }
}

/// Status of a single execution
///
/// `queued → running → {success | failed}` and `queued → cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Waiting for a concurrency slot
    Queued,
    /// Holding a slot, executor invoked
    Running,
    /// Executor reported success
    Success,
    /// Executor failed, errored, or was cancelled while running
    Failed,
    /// Cancelled before it ever started
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Output of one action against one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code, when the action is a process
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Opaque return value for tasks and plans
    pub value: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// Result of a process that exited with `exit_code`
    pub fn from_exit(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            value: None,
        }
    }

    /// Result carrying only a return value
    pub fn from_value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// A missing exit code counts as success
    pub fn is_success(&self) -> bool {
        self.exit_code.map_or(true, |code| code == 0)
    }
}

/// Rejected lifecycle transition
#[derive(Error, Debug, Clone, PartialEq)]
#[error("execution {execution_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    /// Execution that rejected the transition
    pub execution_id: Uuid,
    /// Status at the time of the attempt
    pub from: ExecutionStatus,
    /// Requested status
    pub to: ExecutionStatus,
}

/// One action run against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique id
    pub id: Uuid,
    /// Command, task or plan
    pub execution_type: ExecutionType,
    /// Target identifier
    pub target_id: String,
    /// Command string or task/plan name
    pub action: String,
    /// Executor parameters
    pub parameters: Parameters,
    /// Current status
    pub status: ExecutionStatus,
    /// User who requested it
    pub requested_by: String,
    /// When the record was created
    pub enqueued_at: DateTime<Utc>,
    /// When a slot was granted
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Executor output
    pub result: Option<ExecutionResult>,
    /// Failure reason
    pub error: Option<String>,
    /// Owning batch, `None` for standalone executions
    pub batch_id: Option<Uuid>,
    /// Position within the owning batch
    pub batch_position: Option<usize>,
}

impl Execution {
    /// Create a queued standalone execution
    pub fn new(
        execution_type: ExecutionType,
        target_id: impl Into<String>,
        action: impl Into<String>,
        parameters: Parameters,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_type,
            target_id: target_id.into(),
            action: action.into(),
            parameters,
            status: ExecutionStatus::Queued,
            requested_by: requested_by.into(),
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            batch_id: None,
            batch_position: None,
        }
    }

    /// Attach the execution to a batch at `position`
    pub fn in_batch(mut self, batch_id: Uuid, position: usize) -> Self {
        self.batch_id = Some(batch_id);
        self.batch_position = Some(position);
        self
    }

    fn reject(&self, to: ExecutionStatus) -> TransitionError {
        TransitionError {
            execution_id: self.id,
            from: self.status,
            to,
        }
    }

    /// `queued → running`
    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Queued {
            return Err(self.reject(ExecutionStatus::Running));
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// `running → success | failed`
    ///
    /// Also accepted from `queued` when the start transition was never
    /// recorded; `started_at` is then back-filled so the record stays consistent.
    pub fn mark_finished(
        &mut self,
        status: ExecutionStatus,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: Option<ExecutionResult>,
        error: Option<String>,
    ) -> Result<(), TransitionError> {
        let allowed_target = matches!(status, ExecutionStatus::Success | ExecutionStatus::Failed);
        let allowed_source = matches!(
            self.status,
            ExecutionStatus::Queued | ExecutionStatus::Running
        );
        if !allowed_target || !allowed_source {
            return Err(self.reject(status));
        }
        if self.started_at.is_none() {
            self.started_at = Some(started_at);
        }
        self.status = status;
        self.completed_at = Some(completed_at);
        self.result = result;
        self.error = error;
        Ok(())
    }

    /// `queued → cancelled`
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Queued {
            return Err(self.reject(ExecutionStatus::Cancelled));
        }
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(at);
        self.error = Some("cancelled before start".to_string());
        Ok(())
    }

    /// Checks the timestamp invariants tied to `status`
    pub fn timestamps_consistent(&self) -> bool {
        let completed_expected = self.status.is_terminal();
        let started_expected = matches!(
            self.status,
            ExecutionStatus::Running | ExecutionStatus::Success | ExecutionStatus::Failed
        );
        self.completed_at.is_some() == completed_expected
            && self.started_at.is_some() == started_expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> Execution {
        Execution::new(
            ExecutionType::Command,
            "web-01",
            "uptime",
            Parameters::new(),
            "alice",
        )
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut execution = queued();
        assert!(execution.timestamps_consistent());

        let started = Utc::now();
        execution.mark_running(started).unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.timestamps_consistent());

        execution
            .mark_finished(
                ExecutionStatus::Success,
                started,
                Utc::now(),
                Some(ExecutionResult::from_exit(0, "up 3 days", "")),
                None,
            )
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.started_at, Some(started));
        assert!(execution.timestamps_consistent());
    }

    #[test]
    fn test_cancel_only_from_queued() {
        let mut execution = queued();
        execution.mark_cancelled(Utc::now()).unwrap();
        assert!(execution.started_at.is_none());
        assert!(execution.timestamps_consistent());

        let mut running = queued();
        running.mark_running(Utc::now()).unwrap();
        let err = running.mark_cancelled(Utc::now()).unwrap_err();
        assert_eq!(err.from, ExecutionStatus::Running);
        assert_eq!(err.to, ExecutionStatus::Cancelled);
    }

    #[test]
    fn test_terminal_records_are_frozen() {
        let mut execution = queued();
        let now = Utc::now();
        execution
            .mark_finished(ExecutionStatus::Failed, now, now, None, Some("boom".into()))
            .unwrap();

        assert!(execution.mark_running(now).is_err());
        assert!(execution.mark_cancelled(now).is_err());
        assert!(execution
            .mark_finished(ExecutionStatus::Success, now, now, None, None)
            .is_err());
        assert_eq!(execution.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_finish_from_queued_backfills_start() {
        let mut execution = queued();
        let started = Utc::now();
        execution
            .mark_finished(ExecutionStatus::Success, started, Utc::now(), None, None)
            .unwrap();
        assert_eq!(execution.started_at, Some(started));
        assert!(execution.timestamps_consistent());
    }

    #[test]
    fn test_finish_rejects_non_outcome_status() {
        let mut execution = queued();
        let now = Utc::now();
        assert!(execution
            .mark_finished(ExecutionStatus::Cancelled, now, now, None, None)
            .is_err());
        assert_eq!(execution.status, ExecutionStatus::Queued);
    }

    #[test]
    fn test_result_success_classification() {
        assert!(ExecutionResult::from_exit(0, "", "").is_success());
        assert!(!ExecutionResult::from_exit(2, "", "no such file").is_success());
        assert!(ExecutionResult::from_value(serde_json::json!({"ok": true})).is_success());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(ExecutionType::Plan.to_string(), "plan");
    }
}
