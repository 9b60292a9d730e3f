//! Units of work and the attempt/timeout layer that runs them.
//!
//! A stage's steps are handed to the execution layer as one [`UnitOfWork`]:
//! the stage name, its steps in order and its effective agent. The
//! [`UnitRunner`] trait is the seam the engine talks to; the in-process
//! [`RetryingUnitRunner`] implements it over an execution backend.

mod retry;
mod runner;

pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig};
pub use runner::RetryingUnitRunner;

use crate::cancellation::CancellationToken;
use crate::errors::TumblerError;
use crate::model::{Agent, Command, Stage, Step};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The signature of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    /// The stage name.
    pub name: String,
    /// Steps in declaration order.
    pub steps: Vec<Step>,
    /// The stage's effective agent.
    pub agent: Agent,
    /// Variables exported to the environment of every command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl UnitOfWork {
    /// Creates a unit with no environment.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Step>, agent: Agent) -> Self {
        Self {
            name: name.into(),
            steps,
            agent,
            env: BTreeMap::new(),
        }
    }

    /// Builds the unit for a stage's own steps.
    ///
    /// Steps are copied without transformation; `variables` is snapshotted.
    #[must_use]
    pub fn from_stage(stage: &Stage, variables: &HashMap<String, String>) -> Self {
        Self::new(stage.name.clone(), stage.steps.clone(), stage.effective_agent())
            .with_env(variables.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Adds environment variables.
    #[must_use]
    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Translates every step into its canonical command.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.steps.iter().map(Step::to_command).collect()
    }
}

/// Runs a unit of work to completion, failure or cancellation.
#[async_trait]
pub trait UnitRunner: Send + Sync {
    /// Runs the unit and returns one output per step.
    ///
    /// # Errors
    ///
    /// Returns [`TumblerError::UnitExecution`] once attempts are exhausted or
    /// a non-retryable error occurs, and [`TumblerError::Cancelled`] when
    /// `token` is cancelled first.
    async fn run_unit(
        &self,
        unit: &UnitOfWork,
        token: &CancellationToken,
    ) -> Result<Vec<String>, TumblerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_stage_keeps_steps_and_agent() {
        let stage = Stage::new("Example Build")
            .with_agent(Agent::container("maven:3.9.0-eclipse-temurin-11"))
            .with_step(Step::single("echo", "Hello, Maven"))
            .with_step(Step::single("sh", "mvn --version"));
        let variables = HashMap::from([("BUILD_ID".to_string(), "7".to_string())]);

        let unit = UnitOfWork::from_stage(&stage, &variables);

        assert_eq!(unit.name, "Example Build");
        assert_eq!(unit.steps, stage.steps);
        assert_eq!(unit.agent, Agent::container("maven:3.9.0-eclipse-temurin-11"));
        assert_eq!(unit.env.get("BUILD_ID").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_from_stage_agent_defaults_to_none() {
        let stage = Stage::new("plain").with_step(Step::single("echo", "x"));

        let unit = UnitOfWork::from_stage(&stage, &HashMap::new());
        assert_eq!(unit.agent, Agent::None);
        assert!(unit.env.is_empty());
    }

    #[test]
    fn test_commands() {
        let unit = UnitOfWork::new(
            "checkout",
            vec![
                Step::single("echo", "hello"),
                Step::multi("git", [("url", "ssh://x")]),
            ],
            Agent::None,
        );

        let commands = unit.commands();
        assert_eq!(
            commands[0],
            Command::Shell {
                text: "echo 'hello'".to_string()
            }
        );
        assert_eq!(commands[1].name(), "git");
    }
}
