//! Batch dispatch example
//!
//! Runs a shell command against a handful of local "targets" through the
//! orchestrator, cancels a second batch midway, and prints the aggregated
//! status and the Prometheus metrics at the end.

use anyhow::Context;
use fleet_dispatch::batch::{BatchOrchestrator, BatchRequest};
use fleet_dispatch::config::DispatchConfig;
use fleet_dispatch::executor::{ExecutorRegistry, LocalCommandExecutor};
use fleet_dispatch::inventory::{StaticInventory, Target, Transport};
use fleet_dispatch::metrics::DispatchMetrics;
use fleet_dispatch::model::ExecutionType;
use fleet_dispatch::repository::InMemoryExecutionRepository;
use fleet_dispatch::telemetry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_for_batch(orchestrator: &BatchOrchestrator, batch_id: Uuid) -> anyhow::Result<()> {
    loop {
        let report = orchestrator.get_batch_status(batch_id, None).await?;
        println!(
            "  {} {:>3}% {:?}",
            report.batch.status, report.progress_percent, report.batch.stats
        );
        if report.batch.status.is_terminal() {
            for execution in &report.executions {
                println!(
                    "    {:<8} {:<9} {}",
                    execution.target_id,
                    execution.status,
                    execution
                        .error
                        .clone()
                        .or_else(|| execution.result.as_ref().map(|r| r.stdout.trim().to_string()))
                        .unwrap_or_default()
                );
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("fleet_dispatch=info");

    let config = DispatchConfig::from_env()
        .context("reading dispatch configuration")?
        .with_concurrency_limit(2);

    let inventory = (1..=5).fold(StaticInventory::new(), |inventory, i| {
        let id = format!("local-{}", i);
        inventory.with_target(Target::new(id, "localhost", Transport::Local))
    });
    let inventory = inventory
        .with_group("odd", ["local-1", "local-3", "local-5"])
        .with_group("even", ["local-2", "local-4"]);

    let executors = ExecutorRegistry::new().register(
        Transport::Local,
        Arc::new(LocalCommandExecutor::new().with_timeout(Duration::from_secs(10))),
    );
    let orchestrator = BatchOrchestrator::new(
        Arc::new(InMemoryExecutionRepository::new()),
        Arc::new(inventory),
        executors,
        config,
    )?;

    println!("Batch 1: greet every node");
    let request = BatchRequest::new(ExecutionType::Command, "sleep 0.2; echo \"hello $PT_name\"")
        .with_groups(["odd", "even", "missing"])
        .with_parameter("name", json!("fleet"));
    let created = orchestrator.create_batch(request, "demo").await?;
    println!(
        "  batch {} with {} targets (unresolved groups: {:?})",
        created.batch_id, created.target_count, created.unresolved_groups
    );
    wait_for_batch(&orchestrator, created.batch_id).await?;

    println!("\nBatch 2: long-running command, cancelled while queued");
    let request = BatchRequest::new(ExecutionType::Command, "sleep 1")
        .with_targets(["local-1", "local-2", "local-3", "local-4", "local-5"]);
    let created = orchestrator.create_batch(request, "demo").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled = orchestrator.cancel_batch(created.batch_id).await?;
    println!("  cancelled {} queued executions", cancelled);
    wait_for_batch(&orchestrator, created.batch_id).await?;

    println!("\nQueue: {:?}", orchestrator.queue_status());

    let metrics = DispatchMetrics::export_metrics().map_err(anyhow::Error::msg)?;
    println!("\nMetrics:");
    for line in metrics.lines().filter(|l| l.starts_with("dispatch_")) {
        println!("  {}", line);
    }
    Ok(())
}
