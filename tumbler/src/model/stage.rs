//! Pipeline, stage and parallel group definitions.

use super::{Agent, Step};
use crate::errors::PipelineValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The root of a parsed pipeline. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// The top-level agent.
    pub agent: Agent,
    /// Stages in declaration order.
    pub stages: Vec<Stage>,
}

/// A named unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, unique among its siblings.
    pub name: String,
    /// The agent declared on this stage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    /// Steps in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// The declared `failFast` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    /// Child stages that run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelGroup>,
}

/// Sibling stages started together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelGroup {
    /// Branches in source order. Order does not imply execution order.
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(agent: Agent, stages: Vec<Stage>) -> Self {
        Self { agent, stages }
    }

    /// Returns the total number of stages, nested branches included.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.iter().map(Stage::stage_count).sum()
    }

    /// Finds a stage by its path of names from the top level.
    #[must_use]
    pub fn find(&self, path: &[&str]) -> Option<&Stage> {
        let (first, rest) = path.split_first()?;
        let mut current = self.stages.iter().find(|s| s.name == *first)?;
        for name in rest {
            current = current
                .parallel
                .as_ref()?
                .stages
                .iter()
                .find(|s| s.name == *name)?;
        }
        Some(current)
    }

    /// Checks the structural invariants of the tree.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, in declaration order.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages"));
        }
        validate_agent(&self.agent, "pipeline")?;
        validate_siblings(&self.stages, "pipeline")?;
        self.stages.iter().try_for_each(Stage::validate)
    }
}

impl Stage {
    /// Creates a stage with no agent, steps or parallel group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: None,
            steps: Vec::new(),
            fail_fast: None,
            parallel: None,
        }
    }

    /// Sets the agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets the `failFast` flag.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    /// Sets the parallel branches.
    #[must_use]
    pub fn with_parallel(mut self, stages: Vec<Stage>) -> Self {
        self.parallel = Some(ParallelGroup { stages });
        self
    }

    /// The agent the stage executes with. Not inherited from parents.
    #[must_use]
    pub fn effective_agent(&self) -> Agent {
        self.agent.clone().unwrap_or_default()
    }

    /// Whether the first branch failure cancels the other branches.
    ///
    /// Defaults to true when the flag is absent.
    #[must_use]
    pub fn fail_fast(&self) -> bool {
        self.fail_fast.unwrap_or(true)
    }

    /// Returns true if the stage has its own steps.
    #[must_use]
    pub fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Returns the number of stages in this subtree, itself included.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        1 + self
            .parallel
            .as_ref()
            .map_or(0, |group| group.stages.iter().map(Self::stage_count).sum())
    }

    fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name must not be empty"));
        }
        if let Some(agent) = &self.agent {
            validate_agent(agent, &self.name)?;
        }
        if self.steps.is_empty() && self.parallel.is_none() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has neither steps nor a parallel block",
                self.name
            ))
            .with_stage(&self.name));
        }
        if let Some(key) = self.steps.iter().find_map(Step::duplicate_param) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has a step with duplicate parameter '{key}'",
                self.name
            ))
            .with_stage(&self.name));
        }
        if let Some(group) = &self.parallel {
            if group.stages.is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Parallel block of stage '{}' is empty",
                    self.name
                ))
                .with_stage(&self.name));
            }
            // Own step outputs are stored next to the branches under the
            // stage's own name.
            if self.has_steps() && group.stages.iter().any(|s| s.name == self.name) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' has steps and a parallel branch with its own name",
                    self.name
                ))
                .with_stage(&self.name));
            }
            validate_siblings(&group.stages, &self.name)?;
            group.stages.iter().try_for_each(Self::validate)?;
        }
        Ok(())
    }
}

fn validate_agent(agent: &Agent, owner: &str) -> Result<(), PipelineValidationError> {
    match agent {
        Agent::Container { image } if image.trim().is_empty() => Err(
            PipelineValidationError::new(format!("Agent of '{owner}' has an empty image"))
                .with_stage(owner),
        ),
        _ => Ok(()),
    }
}

fn validate_siblings(stages: &[Stage], parent: &str) -> Result<(), PipelineValidationError> {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.name.as_str()) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{}' under '{parent}'",
                stage.name
            ))
            .with_stages(vec![parent.to_string(), stage.name.clone()]));
        }
    }
    Ok(())
}
