//! Batch creation, aggregation and cancellation

pub mod aggregation;
pub mod expansion;
pub mod orchestrator;
pub mod types;

pub use aggregation::{aggregate, derive_status};
pub use expansion::{dedup_targets, expand_targets, ExpandedTargets};
pub use orchestrator::BatchOrchestrator;
pub use types::*;
