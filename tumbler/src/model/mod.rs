//! The stage tree: pipelines, stages, agents and steps.
//!
//! Trees are produced by [`crate::dsl::parse_pipeline`] and are read-only
//! while they execute.

mod agent;
mod stage;
mod step;

pub use agent::{resolve_image_tag, Agent, DEFAULT_IMAGE_TAG};
pub use stage::{ParallelGroup, Pipeline, Stage};
pub use step::{Command, Param, Step};
