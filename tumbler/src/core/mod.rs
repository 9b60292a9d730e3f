//! Core execution types for tumbler.
//!
//! This module contains the types a run produces:
//! - Stage status enum
//! - The nested results map
//! - The per-stage ledger

mod ledger;
mod results;
mod status;

pub use ledger::{Ledger, StageRecord};
pub use results::{Results, StageValue};
pub use status::StageStatus;
