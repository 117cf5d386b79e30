//! Runs command actions on the orchestrator host.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ActionRequest, ExecutorError, TargetExecutor};
use crate::model::{ExecutionResult, ExecutionType};

/// Executes `command` actions through `sh -c`
///
/// String parameters are exported to the child as `PT_<name>` environment
/// variables.
#[derive(Debug, Clone)]
pub struct LocalCommandExecutor {
    shell: String,
    timeout: Option<Duration>,
}

impl LocalCommandExecutor {
    /// Create an executor using `/bin/sh`
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            timeout: None,
        }
    }

    /// Use a different shell binary
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Give up on commands running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for LocalCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetExecutor for LocalCommandExecutor {
    async fn execute(
        &self,
        request: ActionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        if request.execution_type != ExecutionType::Command {
            return Err(ExecutorError::Unsupported(request.execution_type));
        }

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.action)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &request.parameters {
            if let Some(text) = value.as_str() {
                command.env(format!("PT_{}", name), text);
            }
        }

        debug!(target_id = %request.target.id, action = %request.action, "Spawning local command");
        let output = command.output();

        // Dropping the output future kills the child.
        let output = match self.timeout {
            Some(limit) => tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                timed = tokio::time::timeout(limit, output) => match timed {
                    Ok(output) => output,
                    Err(_) => return Err(ExecutorError::Timeout(limit)),
                },
            },
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                output = output => output,
            },
        }
        .map_err(|e| ExecutorError::Failed(format!("failed to spawn {}: {}", self.shell, e)))?;

        Ok(ExecutionResult {
            // A signal-terminated child has no exit code.
            exit_code: Some(output.status.code().unwrap_or(-1)),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            value: None,
        })
    }
}
