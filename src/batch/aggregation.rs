//! Batch status aggregation
//!
//! A batch's stats, status and timestamps are never stored as truth. They are
//! recomputed from the member executions on every read.

use crate::model::{BatchExecution, BatchStats, BatchStatus, Execution};

/// Derive the overall batch status from member counts
///
/// Anything queued or running keeps the batch `running`. Once everything is
/// terminal a recorded cancellation wins, then all-success, then
/// none-succeeded, and mixed outcomes are `partial`.
pub fn derive_status(stats: &BatchStats, cancel_requested: bool) -> BatchStatus {
    if stats.in_flight() > 0 {
        BatchStatus::Running
    } else if cancel_requested {
        BatchStatus::Cancelled
    } else if stats.success == stats.total {
        BatchStatus::Success
    } else if stats.success == 0 {
        BatchStatus::Failed
    } else {
        BatchStatus::Partial
    }
}

/// Fill the derived fields of `batch` from `executions`
pub fn aggregate(mut batch: BatchExecution, executions: &[Execution]) -> BatchExecution {
    let stats = BatchStats::from_statuses(executions.iter().map(|e| e.status));

    batch.status = derive_status(&stats, batch.cancel_requested());
    batch.started_at = executions.iter().filter_map(|e| e.started_at).min();
    batch.completed_at = if stats.in_flight() == 0 {
        executions.iter().filter_map(|e| e.completed_at).max()
    } else {
        None
    };
    batch.stats = stats;
    batch
}
