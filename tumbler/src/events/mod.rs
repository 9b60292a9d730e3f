//! Event sinks for run observability.
//!
//! The engine owns one [`EventSink`] and emits a fixed set of lifecycle
//! events through it. There is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A pipeline run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A pipeline run completed without error.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A pipeline run ended with an error.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage started.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage completed.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage observed cancellation.
pub const STAGE_CANCELLED: &str = "stage.cancelled";
/// A parallel group is cancelling its remaining branches.
pub const PARALLEL_CANCELLING: &str = "parallel.cancelling";
/// One attempt of a unit of work failed.
pub const UNIT_ATTEMPT_FAILED: &str = "unit.attempt_failed";
/// A unit of work is about to be retried.
pub const UNIT_RETRYING: &str = "unit.retrying";
