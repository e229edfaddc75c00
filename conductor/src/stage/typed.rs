//! Typed adapter over the erased JSON stage envelope.
//!
//! Stages are heterogeneous in their input/output types; the orchestrator
//! moves `serde_json::Value` payloads between them. `Typed` lets a stage
//! be written against concrete serde types and handles the envelope
//! conversion, mapping decode failures to `InvalidInput`.

use crate::context::RunContext;
use crate::errors::StageError;
use crate::stage::{Stage, StageResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;

/// A stage with concrete input and output types.
#[async_trait]
pub trait TypedStage: Send + Sync + Debug {
    /// The stage-specific input type.
    type Input: DeserializeOwned + Send;
    /// The stage-specific output type.
    type Output: Serialize + Send;

    /// Validates the decoded input.
    ///
    /// # Errors
    ///
    /// Returns a `StageError` describing why the input is unusable.
    fn validate(&self, _input: &Self::Input) -> Result<(), StageError> {
        Ok(())
    }

    /// Executes one attempt against the decoded input.
    ///
    /// # Errors
    ///
    /// Returns a `StageError`; its kind decides whether the runner
    /// retries the attempt.
    async fn execute(
        &self,
        input: Self::Input,
        ctx: &RunContext,
    ) -> Result<Self::Output, StageError>;
}

/// Adapter that exposes a [`TypedStage`] through the erased [`Stage`] trait.
#[derive(Debug)]
pub struct Typed<T> {
    inner: T,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedStage> Typed<T> {
    /// Wraps a typed stage.
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns a reference to the wrapped stage.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: TypedStage> Stage for Typed<T> {
    fn validate(&self, input: &serde_json::Value) -> Result<(), StageError> {
        let decoded: T::Input = serde_json::from_value(input.clone())
            .map_err(|e| StageError::invalid_input(format!("input does not decode: {e}")))?;
        self.inner.validate(&decoded)
    }

    async fn execute(&self, input: &serde_json::Value, ctx: &RunContext) -> StageResult {
        let decoded: T::Input = match serde_json::from_value(input.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                return StageResult::failure(StageError::invalid_input(format!(
                    "input does not decode: {e}"
                )))
            }
        };

        match self.inner.execute(decoded, ctx).await {
            Ok(output) => match serde_json::to_value(output) {
                Ok(value) => StageResult::success(value),
                Err(e) => StageResult::failure(StageError::fatal(format!(
                    "output does not serialize: {e}"
                ))),
            },
            Err(error) => StageResult::failure(error),
        }
    }
}
