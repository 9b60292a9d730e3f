//! Per-stage execution ledger.

use super::StageStatus;
use crate::errors::TumblerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The terminal record of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage names from the top level down to this stage.
    pub path: Vec<String>,
    /// Terminal status.
    pub status: StageStatus,
    /// Error message for failed and cancelled stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage reached its terminal status.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl StageRecord {
    /// Creates a record for a stage that finishes now.
    #[must_use]
    pub fn finish(path: Vec<String>, started_at: DateTime<Utc>, outcome: &Result<(), TumblerError>) -> Self {
        let finished_at = Utc::now();
        let (status, error) = match outcome {
            Ok(()) => (StageStatus::Ok, None),
            Err(err) if err.is_cancellation() => (StageStatus::Cancel, Some(err.to_string())),
            Err(err) => (StageStatus::Fail, Some(err.to_string())),
        };
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0);
        Self {
            path,
            status,
            error,
            started_at,
            finished_at,
            duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
        }
    }

    /// Returns the path joined with `/`.
    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }
}

/// Collects stage records from concurrently running branches.
#[derive(Debug, Default)]
pub struct Ledger {
    records: Mutex<Vec<StageRecord>>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&self, record: StageRecord) {
        self.records.lock().push(record);
    }

    /// Returns a copy of all records in the order they finished.
    #[must_use]
    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().clone()
    }

    /// Takes all records out of the ledger.
    #[must_use]
    pub fn take(&self) -> Vec<StageRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
