//! Execution and batch records

pub mod batch;
pub mod execution;

pub use batch::{BatchExecution, BatchStats, BatchStatus};
pub use execution::{
    Execution, ExecutionResult, ExecutionStatus, ExecutionType, Parameters, TransitionError,
};
