//! Execution backends: turn a unit of work into one output per step.
//!
//! - [`HostShell`] runs every command on the host
//! - [`DockerCli`] runs every command inside a fresh container
//! - [`ProcessBackend`] picks one of the two from the unit's agent

mod docker;
mod handlers;
mod process;
mod shell;

pub use docker::DockerCli;
pub use handlers::{shell_quote, GitHandler, ShHandler, StepHandler, StepHandlers};
pub use process::ProcessBackend;
pub use shell::HostShell;

use crate::errors::{BackendError, TumblerError};
use crate::unit::UnitOfWork;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Produces the outputs of a unit of work.
///
/// One call is one attempt. Implementations must release whatever they hold
/// (processes, containers) when the returned future is dropped early.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Executes every step of the unit in order and returns one output per
    /// step. Stops at the first failing step.
    async fn execute(&self, unit: &UnitOfWork) -> Result<Vec<String>, BackendError>;
}

/// When to pull container images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull only when the image is not present locally.
    #[default]
    IfNotPresent,
    /// Pull before every unit.
    Always,
    /// Never pull.
    Never,
}

fn default_host_shell() -> String {
    "bash".to_string()
}

fn default_container_shell() -> String {
    "sh".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

/// Configuration of the process backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Shell used on the host, invoked as `<shell> -c <text>`.
    #[serde(default = "default_host_shell")]
    pub host_shell: String,
    /// Shell used inside containers.
    #[serde(default = "default_container_shell")]
    pub container_shell: String,
    /// The docker-compatible CLI to invoke.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// When to pull images.
    #[serde(default)]
    pub pull_policy: PullPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host_shell: default_host_shell(),
            container_shell: default_container_shell(),
            docker_binary: default_docker_binary(),
            pull_policy: PullPolicy::default(),
        }
    }
}

impl BackendConfig {
    /// Sets the host shell.
    #[must_use]
    pub fn with_host_shell(mut self, shell: impl Into<String>) -> Self {
        self.host_shell = shell.into();
        self
    }

    /// Sets the container shell.
    #[must_use]
    pub fn with_container_shell(mut self, shell: impl Into<String>) -> Self {
        self.container_shell = shell.into();
        self
    }

    /// Sets the docker binary.
    #[must_use]
    pub fn with_docker_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    /// Sets the pull policy.
    #[must_use]
    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Checks that every program name is set.
    ///
    /// # Errors
    ///
    /// Returns [`TumblerError::Config`] naming the first empty field.
    pub fn validate(&self) -> Result<(), TumblerError> {
        for (field, value) in [
            ("host_shell", &self.host_shell),
            ("container_shell", &self.container_shell),
            ("docker_binary", &self.docker_binary),
        ] {
            if value.trim().is_empty() {
                return Err(TumblerError::Config(format!("backend.{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Removes control characters (terminal escapes, carriage returns, newlines)
/// from command output.
#[must_use]
pub fn strip_control_chars(output: &str) -> String {
    output.chars().filter(|c| !c.is_control()).collect()
}
