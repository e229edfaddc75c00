//! Stage result envelope with factory methods.

use crate::errors::StageError;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The stage produced an output.
    Success,
    /// The stage failed (after any retries the runner performed).
    Failure,
    /// The run's cancellation signal fired before the stage finished.
    Cancelled,
}

/// The in-memory result of executing one stage.
///
/// Created by the runner, consumed by the orchestrator to update the run
/// context and write a checkpoint record; not retained beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The outcome tag.
    pub outcome: Outcome,

    /// The output payload (present only on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Structured error information (present only on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,

    /// Number of attempts the runner made, including the final one.
    pub attempts: u32,
}

impl StageResult {
    /// Creates a successful result with an output payload.
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            outcome: Outcome::Success,
            output: Some(output),
            error: None,
            attempts: 1,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(error: StageError) -> Self {
        Self {
            outcome: Outcome::Failure,
            output: None,
            error: Some(error),
            attempts: 1,
        }
    }

    /// Creates a cancelled result.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            outcome: Outcome::Cancelled,
            output: None,
            error: Some(StageError::cancelled("run cancellation signal fired")),
            attempts: 1,
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failure
    }

    /// Returns true if the error, if any, may be re-attempted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(StageError::is_retryable)
    }
}
