//! Dispatch metrics collection
//!
//! Provides Prometheus-compatible metrics for the execution queue and the
//! batch orchestrator: slot occupancy, admission waits, execution outcomes,
//! batch creation, rejections and cancellations.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Tickets waiting for a slot
    pub static ref QUEUE_WAITING: IntGauge = register_int_gauge!(
        "dispatch_queue_waiting",
        "Number of tickets waiting in the FIFO admission list"
    ).unwrap();

    /// Tickets holding a slot
    pub static ref QUEUE_RUNNING: IntGauge = register_int_gauge!(
        "dispatch_queue_running",
        "Number of tickets currently holding a concurrency slot"
    ).unwrap();

    /// Time between admission and dispatch
    pub static ref QUEUE_WAIT_SECONDS: Histogram = register_histogram!(
        "dispatch_queue_wait_seconds",
        "Time a ticket spent waiting for a concurrency slot",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).unwrap();

    /// Terminal ticket outcomes
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dispatch_executions_total",
        "Total number of executions that reached a terminal outcome",
        &["outcome"]
    ).unwrap();

    /// Batches accepted
    pub static ref BATCHES_CREATED: IntCounter = register_int_counter!(
        "dispatch_batches_created_total",
        "Total number of batches created"
    ).unwrap();

    /// Batch requests rejected before persistence
    pub static ref BATCH_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "dispatch_batch_rejections_total",
        "Total number of batch requests rejected",
        &["reason"]
    ).unwrap();

    /// Cancellations by kind (dequeued or signalled)
    pub static ref CANCELLATIONS: IntCounterVec = register_int_counter_vec!(
        "dispatch_cancellations_total",
        "Total number of execution cancellations",
        &["kind"]
    ).unwrap();
}

/// Dispatch metrics collector
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// A ticket joined the waiting list
    pub fn ticket_waiting() {
        QUEUE_WAITING.inc();
    }

    /// A ticket left the waiting list
    pub fn ticket_left_waiting() {
        QUEUE_WAITING.dec();
    }

    /// A ticket took a slot after waiting `waited`
    pub fn slot_acquired(waited: Duration) {
        QUEUE_RUNNING.inc();
        QUEUE_WAIT_SECONDS.observe(waited.as_secs_f64());
    }

    /// A ticket gave its slot back
    pub fn slot_released() {
        QUEUE_RUNNING.dec();
    }

    /// Record a terminal outcome (`success`, `failed`, `cancelled`)
    pub fn record_outcome(outcome: &str) {
        EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a created batch
    pub fn record_batch_created() {
        BATCHES_CREATED.inc();
    }

    /// Record a rejected batch request
    pub fn record_batch_rejection(reason: &str) {
        BATCH_REJECTIONS.with_label_values(&[reason]).inc();
    }

    /// Record a cancellation (`dequeued` or `signalled`)
    pub fn record_cancellation(kind: &str) {
        CANCELLATIONS.with_label_values(&[kind]).inc();
    }

    /// Get all dispatch metrics in Prometheus text format
    pub fn export_metrics() -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome() {
        let before = EXECUTIONS_TOTAL.with_label_values(&["success"]).get();
        DispatchMetrics::record_outcome("success");
        assert!(EXECUTIONS_TOTAL.with_label_values(&["success"]).get() > before);
    }

    #[test]
    fn test_export_metrics() {
        DispatchMetrics::record_batch_created();
        DispatchMetrics::record_cancellation("dequeued");
        let metrics_text = DispatchMetrics::export_metrics().unwrap();
        assert!(metrics_text.contains("dispatch_batches_created_total"));
        assert!(metrics_text.contains("dispatch_cancellations_total"));
    }
}
