//! Batch records grouping executions that share one action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::execution::{ExecutionStatus, ExecutionType, Parameters};

/// Overall status of a batch, derived from its executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// At least one execution is queued or running
    Running,
    /// Every execution succeeded
    Success,
    /// No execution succeeded
    Failed,
    /// Mixed terminal outcomes
    Partial,
    /// Cancellation was requested and nothing is left running
    Cancelled,
}

impl BatchStatus {
    /// Whether the batch has settled
    pub fn is_terminal(self) -> bool {
        self != BatchStatus::Running
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Running => "running",
            BatchStatus::Success => "success",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Execution counts for a batch
///
/// `failed` includes cancelled executions; `cancelled` repeats that subset so
/// `queued + running + success + failed == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Number of executions in the batch
    pub total: usize,
    /// Waiting for a slot
    pub queued: usize,
    /// Holding a slot
    pub running: usize,
    /// Finished successfully
    pub success: usize,
    /// Finished unsuccessfully, cancelled included
    pub failed: usize,
    /// Cancelled before start (subset of `failed`)
    pub cancelled: usize,
}

impl BatchStats {
    /// Stats for a freshly created batch of `total` queued executions
    pub fn all_queued(total: usize) -> Self {
        Self {
            total,
            queued: total,
            ..Default::default()
        }
    }

    /// Count statuses
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ExecutionStatus>,
    {
        let mut stats = Self::default();
        for status in statuses {
            stats.total += 1;
            match status {
                ExecutionStatus::Queued => stats.queued += 1,
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Success => stats.success += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => {
                    stats.failed += 1;
                    stats.cancelled += 1;
                }
            }
        }
        stats
    }

    /// Executions that reached a terminal status
    pub fn finished(&self) -> usize {
        self.success + self.failed
    }

    /// Executions still queued or running
    pub fn in_flight(&self) -> usize {
        self.queued + self.running
    }

    /// Whether the buckets add up to `total`
    pub fn is_balanced(&self) -> bool {
        self.queued + self.running + self.success + self.failed == self.total
            && self.cancelled <= self.failed
    }

    /// Percentage of finished executions, rounded
    pub fn progress_percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = (self.finished() as f64 * 100.0 / self.total as f64).round();
        percent.clamp(0.0, 100.0) as u8
    }
}

/// A named group of executions created from one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchExecution {
    /// Unique id
    pub id: Uuid,
    /// Command, task or plan
    pub execution_type: ExecutionType,
    /// Command string or task/plan name
    pub action: String,
    /// Executor parameters shared by every execution
    pub parameters: Parameters,
    /// Deduplicated, ordered target ids
    pub target_ids: Vec<String>,
    /// Group ids as given in the request
    pub group_ids: Vec<String>,
    /// Derived status (recomputed on read)
    pub status: BatchStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Earliest execution start (derived)
    pub started_at: Option<DateTime<Utc>>,
    /// Latest execution completion once all are terminal (derived)
    pub completed_at: Option<DateTime<Utc>>,
    /// When cancellation was requested
    pub cancel_requested_at: Option<DateTime<Utc>>,
    /// Owning user
    pub user_id: String,
    /// Member execution ids, ordered by batch position
    pub execution_ids: Vec<Uuid>,
    /// Derived counts (recomputed on read)
    pub stats: BatchStats,
}

impl BatchExecution {
    /// Create a batch record for `target_ids` and matching `execution_ids`
    pub fn new(
        execution_type: ExecutionType,
        action: impl Into<String>,
        parameters: Parameters,
        target_ids: Vec<String>,
        group_ids: Vec<String>,
        user_id: impl Into<String>,
        execution_ids: Vec<Uuid>,
    ) -> Self {
        let total = execution_ids.len();
        Self {
            id: Uuid::new_v4(),
            execution_type,
            action: action.into(),
            parameters,
            target_ids,
            group_ids,
            status: BatchStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel_requested_at: None,
            user_id: user_id.into(),
            execution_ids,
            stats: BatchStats::all_queued(total),
        }
    }

    /// Whether `cancel_batch` has been recorded
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stats_fold_cancelled_into_failed() {
        let stats = BatchStats::from_statuses([
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Cancelled,
        ]);

        assert_eq!(
            stats,
            BatchStats {
                total: 6,
                queued: 1,
                running: 1,
                success: 1,
                failed: 3,
                cancelled: 2,
            }
        );
        assert!(stats.is_balanced());
        assert_eq!(stats.in_flight(), 2);
        assert_eq!(stats.progress_percent(), 67);
    }

    #[test]
    fn test_progress_bounds() {
        assert_eq!(BatchStats::default().progress_percent(), 0);
        assert_eq!(BatchStats::all_queued(4).progress_percent(), 0);

        let done = BatchStats::from_statuses([ExecutionStatus::Success, ExecutionStatus::Failed]);
        assert_eq!(done.progress_percent(), 100);
    }

    #[test]
    fn test_new_batch_is_running_and_queued() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let batch = BatchExecution::new(
            ExecutionType::Task,
            "package::install",
            Parameters::new(),
            vec!["a".into(), "b".into()],
            vec!["web".into()],
            "alice",
            ids.clone(),
        );

        assert_eq!(batch.status, BatchStatus::Running);
        assert_eq!(batch.stats, BatchStats::all_queued(2));
        assert_eq!(batch.execution_ids, ids);
        assert!(!batch.cancel_requested());
    }
}
