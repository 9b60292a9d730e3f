//! Agent-dispatching backend.

use super::{BackendConfig, DockerCli, ExecutionBackend, HostShell, StepHandlers};
use crate::errors::BackendError;
use crate::model::Agent;
use crate::unit::UnitOfWork;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs host units through [`HostShell`] and container units through
/// [`DockerCli`].
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    host: HostShell,
    docker: DockerCli,
}

impl ProcessBackend {
    /// Creates a backend from configuration with the built-in step handlers.
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self::with_handlers(config, Arc::new(StepHandlers::with_builtins()))
    }

    /// Creates a backend sharing one step handler registry between both modes.
    #[must_use]
    pub fn with_handlers(config: &BackendConfig, handlers: Arc<StepHandlers>) -> Self {
        Self {
            host: HostShell::new(config.host_shell.clone()).with_handlers(handlers.clone()),
            docker: DockerCli::new(config.docker_binary.clone(), config.container_shell.clone())
                .with_pull_policy(config.pull_policy)
                .with_handlers(handlers),
        }
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new(&BackendConfig::default())
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn execute(&self, unit: &UnitOfWork) -> Result<Vec<String>, BackendError> {
        match unit.agent {
            Agent::None => self.host.execute(unit).await,
            Agent::Container { .. } => self.docker.execute(unit).await,
        }
    }
}
