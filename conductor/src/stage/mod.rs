//! Stage trait and implementations.
//!
//! A stage is one unit of pipeline work: a typed input, a typed output
//! wrapped in a result envelope, and an input-validation hook. What a
//! stage computes is arbitrary (an LLM call, TTS synthesis, an FFmpeg
//! invocation); the orchestration core only sees this contract.

mod result;
pub mod subprocess;
pub mod typed;

pub use result::{Outcome, StageResult};
pub use subprocess::SubprocessStage;
pub use typed::{Typed, TypedStage};

use crate::context::RunContext;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// Implementations must be safely re-invocable: retries and resume
/// replays can execute the same logical stage more than once across
/// process restarts if a checkpoint write was lost before a crash.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Validates the input before execution.
    ///
    /// A failing validation short-circuits execution and is recorded as
    /// an `InvalidInput` failure, never retried.
    ///
    /// # Errors
    ///
    /// Returns a `StageError` describing why the input is unusable.
    fn validate(&self, _input: &serde_json::Value) -> Result<(), StageError> {
        Ok(())
    }

    /// Executes one attempt of the stage.
    ///
    /// The runner wraps this call in a timeout and cancellation envelope;
    /// long-running implementations should observe `ctx.cancel_token()`
    /// and unwind promptly when it fires.
    async fn execute(&self, input: &serde_json::Value, ctx: &RunContext) -> StageResult;
}

/// An async closure-based stage.
pub struct FnStage<F> {
    func: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = StageResult> + Send,
{
    /// Creates a new closure-based stage.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStage<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = StageResult> + Send,
{
    async fn execute(&self, input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        (self.func)(input.clone()).await
    }
}

/// A stage that succeeds immediately, echoing its input as its output.
#[derive(Debug, Clone, Default)]
pub struct NoOpStage;

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for NoOpStage {
    async fn execute(&self, input: &serde_json::Value, _ctx: &RunContext) -> StageResult {
        StageResult::success(input.clone())
    }
}
