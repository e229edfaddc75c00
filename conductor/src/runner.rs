//! Single-stage execution envelope.
//!
//! The runner turns "one stage + one input" into one classified result:
//! it validates the input, invokes the stage under a timeout and the
//! run's cancellation signal, retries retryable failures per the stage's
//! policy, and logs every attempt so flaky external dependencies can be
//! diagnosed from the run log alone.

use crate::context::RunContext;
use crate::errors::StageError;
use crate::graph::StageDescriptor;
use crate::stage::{Outcome, StageResult};
use std::time::{Duration, Instant};

/// Pipeline-wide default timeout for stages without an explicit one.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Executes exactly one stage attempt sequence end-to-end.
#[derive(Debug, Clone)]
pub struct StageRunner {
    default_timeout: Duration,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

impl StageRunner {
    /// Creates a runner with the default stage timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the pipeline-wide default timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Runs the stage described by `descriptor` against `input`.
    ///
    /// Never returns `Err`: every outcome, including timeouts and
    /// exhausted retries, is folded into the returned [`StageResult`].
    pub async fn run(
        &self,
        descriptor: &StageDescriptor,
        input: &serde_json::Value,
        ctx: &RunContext,
    ) -> StageResult {
        let stage = descriptor.name();
        let run_id = ctx.run_id();

        if let Err(error) = descriptor.stage().validate(input) {
            tracing::warn!(
                run_id,
                stage,
                error = %error,
                "stage input rejected by validation"
            );
            return StageResult::failure(StageError::invalid_input(error.message))
                .with_attempts(0);
        }

        let timeout = descriptor.timeout().unwrap_or(self.default_timeout);
        let policy = descriptor.retry();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let started = Instant::now();

            let result = tokio::select! {
                outcome = tokio::time::timeout(timeout, descriptor.stage().execute(input, ctx)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => StageResult::failure(StageError::timeout(format!(
                            "stage did not finish within {}ms",
                            timeout.as_millis()
                        ))),
                    }
                }
                () = ctx.cancel_token().cancelled() => StageResult::cancelled(),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result.outcome {
                Outcome::Success => {
                    tracing::info!(run_id, stage, attempt = attempts, elapsed_ms, "stage succeeded");
                    return result.with_attempts(attempts);
                }
                Outcome::Cancelled => {
                    tracing::info!(run_id, stage, attempt = attempts, elapsed_ms, "stage cancelled");
                    return result.with_attempts(attempts);
                }
                Outcome::Failure => {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| StageError::fatal("stage failed without detail"));
                    tracing::warn!(
                        run_id,
                        stage,
                        attempt = attempts,
                        elapsed_ms,
                        error = %error,
                        "stage attempt failed"
                    );

                    if error.is_retryable() && policy.allows_retry(attempts) {
                        let delay = policy.delay_for(attempts - 1);
                        tracing::debug!(
                            run_id,
                            stage,
                            delay_ms = delay.as_millis() as u64,
                            "backing off before retry"
                        );
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = ctx.cancel_token().cancelled() => {
                                return StageResult::cancelled().with_attempts(attempts);
                            }
                        }
                        continue;
                    }

                    return StageResult::failure(error).with_attempts(attempts);
                }
            }
        }
    }
}
