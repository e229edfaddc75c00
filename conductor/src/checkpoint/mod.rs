//! Durable checkpoint records and the store contract.
//!
//! A checkpoint is the durable record of "what has this run already
//! finished". The store is the single source of truth for resume: at
//! most one record exists per (run id, stage name), a new attempt
//! overwrites the prior record, and the core never deletes records.

mod fs;
mod memory;

pub use fs::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use crate::errors::{StageError, StoreError};
use crate::stage::{Outcome, StageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted status of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Not yet attempted (recorded only for force-abandoned work).
    Pending,
    /// The stage produced an output; resume replays it.
    Succeeded,
    /// The stage failed after exhausting its retries.
    Failed,
    /// Never attempted because an upstream dependency failed.
    Skipped,
    /// Interrupted by run cancellation; resume re-runs it.
    Cancelled,
}

impl CheckpointStatus {
    /// Returns true if resume may reuse this record without re-executing.
    ///
    /// Only `Succeeded` qualifies: a skipped stage is re-evaluated on
    /// resume, since the dependency that blocked it may succeed this
    /// time.
    #[must_use]
    pub fn is_replayable(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Durable record of one stage's outcome for a specific run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The run this record belongs to.
    pub run_id: String,
    /// The stage name, unique within the pipeline.
    pub stage: String,
    /// Terminal status of the most recent attempt sequence.
    pub status: CheckpointStatus,
    /// Output payload, present only if `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure description, present only if `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    /// Attempts made in the most recent execution.
    pub attempts: u32,
    /// When the record was written.
    pub completed_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Builds a record from an in-memory stage result.
    #[must_use]
    pub fn from_result(run_id: &str, stage: &str, result: &StageResult) -> Self {
        let status = match result.outcome {
            Outcome::Success => CheckpointStatus::Succeeded,
            Outcome::Failure => CheckpointStatus::Failed,
            Outcome::Cancelled => CheckpointStatus::Cancelled,
        };
        Self {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            status,
            output: result.output.clone(),
            error: result.error.clone(),
            attempts: result.attempts,
            completed_at: Utc::now(),
        }
    }

    /// Builds a `Skipped` record for a stage whose dependency failed.
    #[must_use]
    pub fn skipped(run_id: &str, stage: &str, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            status: CheckpointStatus::Skipped,
            output: None,
            error: Some(StageError::fatal(reason)),
            attempts: 0,
            completed_at: Utc::now(),
        }
    }
}

/// Contract for checkpoint persistence backends.
///
/// `put` must be atomic with respect to process crash: a concurrent
/// reader observes either the previous record or the fully written new
/// one, never a torn write. Stores must support concurrent `get`/`put`
/// for distinct keys without caller-side locking.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetches the record for a (run, stage) pair.
    ///
    /// Absence is a normal outcome on first run, reported as `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` only if the backend itself fails.
    async fn get(&self, run_id: &str, stage: &str)
        -> Result<Option<CheckpointRecord>, StoreError>;

    /// Writes (or overwrites) the record for its (run, stage) key.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the record cannot be persisted. The
    /// orchestrator treats this as fatal to the run: proceeding without
    /// a durable record would make resume unsafe.
    async fn put(&self, record: CheckpointRecord) -> Result<(), StoreError>;

    /// Lists all records for a run, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` only if the backend itself fails.
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, StoreError>;
}
