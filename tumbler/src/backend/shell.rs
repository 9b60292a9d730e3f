//! Host execution through a local shell.

use super::{ExecutionBackend, StepHandlers};
use crate::errors::BackendError;
use crate::unit::UnitOfWork;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Runs each command as `<shell> -c <text>` on the host.
///
/// Unit variables are exported to every command. The child is killed if the
/// attempt is dropped while it runs.
#[derive(Debug, Clone)]
pub struct HostShell {
    shell: String,
    handlers: Arc<StepHandlers>,
}

impl HostShell {
    /// Creates a host backend with the built-in step handlers.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            handlers: Arc::new(StepHandlers::with_builtins()),
        }
    }

    /// Replaces the step handlers.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Arc<StepHandlers>) -> Self {
        self.handlers = handlers;
        self
    }

    async fn run(&self, unit: &UnitOfWork, text: &str) -> Result<String, BackendError> {
        debug!(unit = %unit.name, command = %text, "Running host command");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(text)
            .envs(&unit.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Spawn {
                program: self.shell.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: text.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

impl Default for HostShell {
    fn default() -> Self {
        Self::new("bash")
    }
}

#[async_trait]
impl ExecutionBackend for HostShell {
    async fn execute(&self, unit: &UnitOfWork) -> Result<Vec<String>, BackendError> {
        let mut outputs = Vec::with_capacity(unit.steps.len());
        for command in unit.commands() {
            let text = self.handlers.render(&command)?;
            outputs.push(self.run(unit, &text).await?);
        }
        Ok(outputs)
    }
}
