//! Testing utilities for tumbler pipelines.
//!
//! This module provides:
//! - A scripted unit runner for engine tests
//! - A recording execution backend for runner tests
//! - Pipeline fixtures, including the reference pipeline

mod fixtures;
#[cfg(test)]
pub(crate) mod log_capture;
mod mocks;

pub use fixtures::{echo_stage, fan_out, pipeline_of, reference_pipeline, REFERENCE_PIPELINE};
pub use mocks::{RecordingBackend, ScriptedRunner};
