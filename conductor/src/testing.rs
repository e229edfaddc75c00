//! Scripted stages for exercising the orchestration core in tests.

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::context::RunContext;
use crate::errors::{StageError, StoreError};
use crate::stage::{Stage, StageResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A stage that records calls and returns a configurable result.
#[derive(Debug)]
pub struct MockStage {
    result: Mutex<StageResult>,
    executions: AtomicUsize,
}

impl MockStage {
    /// Creates a mock that succeeds with the given output.
    #[must_use]
    pub fn succeeding_with(output: serde_json::Value) -> Self {
        Self {
            result: Mutex::new(StageResult::success(output)),
            executions: AtomicUsize::new(0),
        }
    }

    /// Creates a mock that fails with the given error.
    #[must_use]
    pub fn failing_with(error: StageError) -> Self {
        Self {
            result: Mutex::new(StageResult::failure(error)),
            executions: AtomicUsize::new(0),
        }
    }

    /// Replaces the result returned by subsequent executions.
    pub fn set_result(&self, result: StageResult) {
        *self.result.lock() = result;
    }

    /// Returns how many times the stage has executed.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for MockStage {
    async fn execute(&self, _input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.result.lock().clone()
    }
}

/// A stage that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    failures: usize,
    executions: AtomicUsize,
}

impl FlakyStage {
    /// Creates a stage whose first `failures` executions fail retryably.
    #[must_use]
    pub fn failing_times(failures: usize) -> Self {
        Self {
            failures,
            executions: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the stage has executed.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FlakyStage {
    async fn execute(&self, input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        let call = self.executions.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            StageResult::failure(StageError::retryable(format!(
                "transient failure {}",
                call + 1
            )))
        } else {
            StageResult::success(input.clone())
        }
    }
}

/// A stage that never returns, for timeout and cancellation tests.
#[derive(Debug, Clone, Copy)]
pub struct HangingStage;

#[async_trait]
impl Stage for HangingStage {
    async fn execute(&self, _input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        std::future::pending::<()>().await;
        StageResult::cancelled()
    }
}

/// A stage whose validation always rejects the input.
#[derive(Debug)]
pub struct RejectingStage {
    message: String,
    executions: AtomicUsize,
}

impl RejectingStage {
    /// Creates a stage rejecting every input with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            executions: AtomicUsize::new(0),
        }
    }

    /// Returns how many times `execute` ran (expected: zero).
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for RejectingStage {
    fn validate(&self, _input: &serde_json::Value) -> Result<(), StageError> {
        Err(StageError::invalid_input(self.message.clone()))
    }

    async fn execute(&self, input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        StageResult::success(input.clone())
    }
}

/// A stage that records the inputs it was handed.
#[derive(Debug, Default)]
pub struct RecordingStage {
    inputs: Mutex<Vec<serde_json::Value>>,
}

impl RecordingStage {
    /// Creates a recording stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the inputs seen so far, in execution order.
    #[must_use]
    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    async fn execute(&self, input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        self.inputs.lock().push(input.clone());
        StageResult::success(input.clone())
    }
}

/// A checkpoint store whose writes always fail, for exercising the
/// abort-on-persist-failure path.
#[derive(Debug, Default)]
pub struct FailingStore {
    puts: AtomicUsize,
}

impl FailingStore {
    /// Creates a store that rejects every `put`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many writes were attempted.
    #[must_use]
    pub fn put_attempts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn get(&self, _run_id: &str, _stage: &str) -> Result<Option<CheckpointRecord>, StoreError> {
        Ok(None)
    }

    async fn put(&self, _record: CheckpointRecord) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io(std::io::Error::other("store offline")))
    }

    async fn list(&self, _run_id: &str) -> Result<Vec<CheckpointRecord>, StoreError> {
        Ok(Vec::new())
    }
}
