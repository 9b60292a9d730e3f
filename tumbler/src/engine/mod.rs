//! The stage-tree execution engine.
//!
//! [`Engine::execute`] walks a [`crate::model::Pipeline`]:
//! - top-level stages run in declaration order and the first failure stops
//!   the rest
//! - a stage runs its parallel group first, then its own steps as one unit
//!   of work
//! - parallel branches run as independent tasks under a derived cancellation
//!   scope; with `failFast` (the default) the first failing branch cancels
//!   its siblings, and the group is always drained before it returns

mod aggregate;
mod executor;
#[cfg(test)]
mod integration_tests;

pub use aggregate::{merge_branches, merge_stage};
pub use executor::{Engine, RunContext, RunOutcome, Variables};
