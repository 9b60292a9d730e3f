//! Structured cancellation utilities.
//!
//! This module provides:
//! - CancellationToken, a tree of cooperative cancellation scopes
//! - TaskGroup for fanning work out and draining it back in

mod task_group;
mod token;

pub use task_group::{GroupOutcome, TaskGroup, TaskReport};
pub use token::CancellationToken;
