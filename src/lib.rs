//! # Fleet Dispatch
//!
//! Concurrency-limited dispatch of commands, tasks and plans against
//! infrastructure targets, with batch grouping, status aggregation and
//! cancellation.
//!
//! ## Overview
//!
//! An operator request names targets directly or through inventory groups.
//! The [`batch::BatchOrchestrator`] expands and deduplicates them, persists one
//! execution per target through an [`repository::ExecutionRepository`], and
//! admits each one into a shared [`queue::ExecutionQueue`]. The queue runs at
//! most `concurrency_limit` executions at once, in FIFO order, through the
//! [`executor::TargetExecutor`] registered for each target's transport.
//! Progress is observed by polling [`batch::BatchOrchestrator::get_batch_status`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleet_dispatch::batch::{BatchOrchestrator, BatchRequest};
//! use fleet_dispatch::config::DispatchConfig;
//! use fleet_dispatch::executor::{ExecutorRegistry, LocalCommandExecutor};
//! use fleet_dispatch::inventory::{StaticInventory, Target, Transport};
//! use fleet_dispatch::model::ExecutionType;
//! use fleet_dispatch::repository::InMemoryExecutionRepository;
//!
//! # async fn example() -> fleet_dispatch::Result<()> {
//! let inventory = StaticInventory::new()
//!     .with_target(Target::new("localhost", "localhost", Transport::Local));
//! let orchestrator = BatchOrchestrator::new(
//!     Arc::new(InMemoryExecutionRepository::new()),
//!     Arc::new(inventory),
//!     ExecutorRegistry::new().register(Transport::Local, Arc::new(LocalCommandExecutor::new())),
//!     DispatchConfig::default().with_concurrency_limit(4),
//! )?;
//!
//! let created = orchestrator
//!     .create_batch(
//!         BatchRequest::new(ExecutionType::Command, "uptime").with_targets(["localhost"]),
//!         "operator",
//!     )
//!     .await?;
//! let report = orchestrator.get_batch_status(created.batch_id, None).await?;
//! println!("{}% done", report.progress_percent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`queue`]: bounded-concurrency FIFO admission and dispatch
//! - [`batch`]: batch creation, aggregation and cancellation
//! - [`model`]: execution and batch records
//! - [`repository`]: persistence contract and in-memory store
//! - [`inventory`]: target lookup and group expansion
//! - [`executor`]: per-transport executors
//! - [`config`]: limits and environment loading
//! - [`metrics`]: Prometheus metrics
//! - [`telemetry`]: tracing setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Main error type for dispatch operations
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Request rejected before anything was persisted
    #[error("Validation error: {0}")]
    Validation(#[from] batch::ValidationError),

    /// Unknown batch or execution id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Queue refused admission
    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    /// Persistence failure
    #[error("Repository error: {0}")]
    Repository(#[from] repository::RepositoryError),

    /// Inventory backend failure
    #[error("Inventory error: {0}")]
    Inventory(#[from] inventory::InventoryError),

    /// Executor failure surfaced to a direct caller
    #[error("Executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    /// Illegal execution lifecycle transition
    #[error("Transition error: {0}")]
    Transition(#[from] model::TransitionError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Batch orchestration
pub mod batch;

/// Limits and environment loading
pub mod config;

/// Per-transport executors
pub mod executor;

/// Inventory collaborator
pub mod inventory;

/// Prometheus metrics
pub mod metrics;

/// Execution and batch records
pub mod model;

/// Concurrency-limited execution queue
pub mod queue;

/// Persistence contract
pub mod repository;

/// Tracing setup
pub mod telemetry;

pub use batch::{BatchCreated, BatchOrchestrator, BatchRequest, BatchStatusReport};
pub use config::DispatchConfig;
pub use queue::{ExecutionQueue, Ticket, TicketOutcome};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_convert() {
        let err: DispatchError = batch::ValidationError::NoTargets.into();
        assert_eq!(err.to_string(), "Validation error: request resolves to no targets");

        let err: DispatchError = queue::QueueError::QueueFull { max: 5 }.into();
        assert!(matches!(err, DispatchError::Queue(_)));
    }
}
