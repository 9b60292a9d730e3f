//! # Tumbler
//!
//! A parser and executor for declarative CI pipelines.
//!
//! Tumbler reads a small Jenkinsfile-like language and runs the resulting
//! stage tree:
//!
//! - **Declarative parsing**: `pipeline { stages { stage('x') { ... } } }`
//!   into an immutable tree with positional parse errors
//! - **Parallel fan-out**: the branches of a `parallel` block run as
//!   concurrent tasks
//! - **Fail-fast cancellation**: the first failing branch cancels its
//!   siblings, and every started branch is awaited before the group returns
//! - **Units of work**: each stage's steps run as one unit with per-attempt
//!   timeouts and retries, on the host or inside a container
//! - **Nested results**: one output list per leaf stage, one nested map per
//!   parallel group
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() {
//! let source = r#"
//!     pipeline {
//!         agent none
//!         stages {
//!             stage('Hello') {
//!                 steps { echo 'Hello, world' }
//!             }
//!         }
//!     }
//! "#;
//!
//! let outcome = tumbler::run(source).await;
//! println!("{}", outcome.results.to_json());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod dsl;
pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod testing;
pub mod unit;

use std::collections::HashMap;
use std::sync::Arc;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{BackendConfig, ExecutionBackend, ProcessBackend, PullPolicy};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::TumblerConfig;
    pub use crate::core::{Results, StageRecord, StageStatus, StageValue};
    pub use crate::dsl::parse_pipeline;
    pub use crate::engine::{Engine, RunContext, RunOutcome};
    pub use crate::errors::{
        ParseError, PipelineValidationError, TumblerError, UnitExecutionError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::model::{Agent, Pipeline, Stage, Step};
    pub use crate::unit::{RetryConfig, UnitOfWork, UnitRunner};
}

pub use config::TumblerConfig;
pub use dsl::parse_pipeline;
pub use engine::{Engine, RunOutcome};
pub use errors::TumblerError;

/// Parses and runs pipeline source with the default configuration.
///
/// Events are logged through `tracing`.
pub async fn run(source: &str) -> RunOutcome {
    run_with_config(source, &TumblerConfig::default(), HashMap::new()).await
}

/// Parses and runs pipeline source.
///
/// Parse, validation and configuration errors end the run before any stage
/// starts; the returned outcome then carries only the error.
pub async fn run_with_config(
    source: &str,
    config: &TumblerConfig,
    variables: HashMap<String, String>,
) -> RunOutcome {
    if let Err(err) = config.validate() {
        return RunOutcome::rejected(err);
    }
    let pipeline = match parse_pipeline(source) {
        Ok(pipeline) => pipeline,
        Err(err) => return RunOutcome::rejected(err.into()),
    };
    let engine = Engine::from_config(config, Arc::new(events::LoggingEventSink::default()));
    engine.run_pipeline(&pipeline, variables).await
}
