//! Container execution through the docker CLI.
//!
//! Each unit gets its own container:
//! - pull the image according to the pull policy
//! - create it with the container shell as entrypoint, then start it
//! - exec every command through the shell
//! - stop and remove it

use super::{strip_control_chars, ExecutionBackend, PullPolicy, StepHandlers};
use crate::errors::BackendError;
use crate::unit::UnitOfWork;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs units inside containers using a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    shell: String,
    pull_policy: PullPolicy,
    handlers: Arc<StepHandlers>,
}

/// Force-removes a container unless disarmed.
///
/// Covers attempts that fail, or are dropped by cancellation or a timeout,
/// between `create` and `rm`.
struct ContainerGuard {
    binary: String,
    id: String,
    armed: bool,
}

impl ContainerGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(container = %self.id, "Force-removing abandoned container");
        let spawned = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &self.id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(container = %self.id, error = %e, "Failed to force-remove container");
                return;
            }
        };
        let id = self.id.clone();
        let mut reap = move || {
            if let Err(e) = child.wait() {
                warn!(container = %id, error = %e, "Failed to wait for container removal");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(reap)),
            Err(_) => reap(),
        }
    }
}

impl DockerCli {
    /// Creates a docker backend with the built-in step handlers.
    #[must_use]
    pub fn new(binary: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            shell: shell.into(),
            pull_policy: PullPolicy::default(),
            handlers: Arc::new(StepHandlers::with_builtins()),
        }
    }

    /// Sets the pull policy.
    #[must_use]
    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Replaces the step handlers.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Arc<StepHandlers>) -> Self {
        self.handlers = handlers;
        self
    }

    async fn docker(&self, args: &[String]) -> Result<Output, BackendError> {
        debug!(binary = %self.binary, args = ?args, "Invoking container CLI");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Spawn {
                program: self.binary.clone(),
                reason: e.to_string(),
            })
    }

    /// Runs a lifecycle operation and returns its trimmed stdout.
    async fn lifecycle(
        &self,
        operation: &str,
        image: &str,
        args: Vec<String>,
    ) -> Result<String, BackendError> {
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(BackendError::Container {
                operation: operation.to_string(),
                image: image.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), BackendError> {
        match self.pull_policy {
            PullPolicy::Never => return Ok(()),
            PullPolicy::IfNotPresent => {
                let inspect = self
                    .docker(&to_args(["image", "inspect", image]))
                    .await?;
                if inspect.status.success() {
                    debug!(image = %image, "Image present, skipping pull");
                    return Ok(());
                }
            }
            PullPolicy::Always => {}
        }
        info!(image = %image, "Pulling image");
        self.lifecycle("pull", image, to_args(["pull", image]))
            .await
            .map(drop)
    }

    async fn exec(
        &self,
        id: &str,
        image: &str,
        env: &BTreeMap<String, String>,
        text: &str,
    ) -> Result<String, BackendError> {
        let output = self.docker(&exec_args(id, &self.shell, env, text)).await?;
        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: text.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: strip_control_chars(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        debug!(container = %id, image = %image, command = %text, "Command completed");
        Ok(strip_control_chars(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn to_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

/// Arguments of `create`: a TTY-attached container whose entrypoint is the shell.
fn create_args(image: &str, shell: &str) -> Vec<String> {
    to_args(["create", "-it", "--entrypoint", shell, image])
}

/// Arguments of `exec`: variables first, then `<shell> -c <text>`.
fn exec_args(id: &str, shell: &str, env: &BTreeMap<String, String>, text: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend(to_args([id, shell, "-c", text]));
    args
}

#[async_trait]
impl ExecutionBackend for DockerCli {
    async fn execute(&self, unit: &UnitOfWork) -> Result<Vec<String>, BackendError> {
        let Some(image) = unit.agent.resolved_image() else {
            return Err(BackendError::Container {
                operation: "create".to_string(),
                image: String::new(),
                reason: format!("unit '{}' has no container agent", unit.name),
            });
        };
        let texts = unit
            .commands()
            .iter()
            .map(|command| self.handlers.render(command))
            .collect::<Result<Vec<_>, _>>()?;

        self.ensure_image(&image).await?;
        let id = self
            .lifecycle("create", &image, create_args(&image, &self.shell))
            .await?;
        let guard = ContainerGuard {
            binary: self.binary.clone(),
            id: id.clone(),
            armed: true,
        };
        info!(unit = %unit.name, image = %image, container = %id, "Container created");

        self.lifecycle("start", &image, to_args(["start", &id])).await?;

        let mut outputs = Vec::with_capacity(texts.len());
        for text in &texts {
            outputs.push(self.exec(&id, &image, &unit.env, text).await?);
        }

        self.lifecycle("stop", &image, to_args(["stop", &id])).await?;
        if let Err(e) = self.lifecycle("remove", &image, to_args(["rm", &id])).await {
            warn!(container = %id, error = %e, "Failed to remove container");
        }
        guard.disarm();

        Ok(outputs)
    }
}
