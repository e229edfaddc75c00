//! Top-level execution engine: group sequencing, resume, failure policy.
//!
//! The orchestrator walks a [`DependencyGraph`] group by group, executing
//! stages through the [`StageRunner`] with bounded concurrency inside
//! each group. Before executing a stage it consults the
//! [`CheckpointStore`]; a prior `Succeeded` record is replayed without
//! re-execution, which is what makes a crashed or interrupted run cheap
//! to restart: paid LLM calls and GPU renders that already finished are
//! never repeated.

use crate::checkpoint::{CheckpointRecord, CheckpointStatus, CheckpointStore};
use crate::context::{CancelToken, RunContext};
use crate::errors::{ConductorError, StageError};
use crate::graph::{DependencyGraph, ExecutionGroup, FailurePolicy, StageDescriptor};
use crate::runner::StageRunner;
use crate::stage::{Outcome, StageResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Hard cap on concurrent stage executions within one group.
pub const MAX_GROUP_PARALLELISM: usize = 8;

/// Terminal status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage resolved without failure.
    Completed,
    /// At least one stage failed (or the run was aborted fail-fast).
    Failed,
    /// The run's cancellation signal fired before completion.
    Cancelled,
}

/// Observable state of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not yet reached.
    Pending,
    /// Currently executing.
    Running,
    /// Resolved from a prior run's checkpoint without re-execution.
    Replayed,
    /// Executed and produced an output in this run.
    Succeeded,
    /// Executed and failed after exhausting retries.
    Failed,
    /// Never attempted because an upstream dependency failed.
    Skipped,
    /// Interrupted by cancellation; eligible to re-run on resume.
    Cancelled,
}

/// Aggregated report of one run, sufficient to present a complete
/// per-stage table without re-reading individual checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// The run identifier.
    pub run_id: String,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Terminal (or Pending, for unreached) state of every stage.
    pub stages: BTreeMap<String, StageState>,
    /// Structured error for every stage that ended Failed.
    pub errors: BTreeMap<String, StageError>,
    /// The first fatal error encountered, if any.
    pub first_error: Option<StageError>,
}

impl RunResult {
    /// Returns true if the run completed without failure.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Returns the recorded state of a stage.
    #[must_use]
    pub fn state_of(&self, stage: &str) -> Option<StageState> {
        self.stages.get(stage).copied()
    }

    /// Returns the failure for a stage that ended Failed.
    #[must_use]
    pub fn error_of(&self, stage: &str) -> Option<&StageError> {
        self.errors.get(stage)
    }
}

#[derive(Debug, Default)]
struct StatusBoard {
    stages: DashMap<String, StageState>,
    finished: AtomicBool,
}

impl StatusBoard {
    fn set(&self, stage: &str, state: StageState) {
        self.stages.insert(stage.to_string(), state);
    }

    fn snapshot(&self) -> HashMap<String, StageState> {
        self.stages
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Drives full pipeline runs, including resume, against one store.
pub struct PipelineOrchestrator {
    store: Arc<dyn CheckpointStore>,
    runner: StageRunner,
    max_parallelism: usize,
    runs: DashMap<String, Arc<StatusBoard>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("max_parallelism", &self.max_parallelism)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over the given checkpoint store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            runner: StageRunner::new(),
            max_parallelism: MAX_GROUP_PARALLELISM,
            runs: DashMap::new(),
        }
    }

    /// Replaces the stage runner (e.g. to change the default timeout).
    #[must_use]
    pub fn with_runner(mut self, runner: StageRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Bounds concurrent stage executions within a group.
    ///
    /// The effective bound is also capped at [`MAX_GROUP_PARALLELISM`].
    #[must_use]
    pub fn with_max_parallelism(mut self, bound: usize) -> Self {
        self.max_parallelism = bound.clamp(1, MAX_GROUP_PARALLELISM);
        self
    }

    /// Returns a read-only per-stage snapshot of a run, usable while the
    /// run is in progress.
    #[must_use]
    pub fn status(&self, run_id: &str) -> Option<HashMap<String, StageState>> {
        self.runs.get(run_id).map(|board| board.snapshot())
    }

    /// Executes (or resumes) a run with a fresh cancellation token.
    ///
    /// # Errors
    ///
    /// Returns an error if the run id is already in progress or if the
    /// checkpoint store fails; stage failures are reported through the
    /// returned [`RunResult`], never as `Err`.
    pub async fn run(
        &self,
        run_id: impl Into<String>,
        initial_input: serde_json::Value,
        graph: &DependencyGraph,
    ) -> Result<RunResult, ConductorError> {
        self.run_with_cancel(run_id, initial_input, graph, CancelToken::new())
            .await
    }

    /// Executes (or resumes) a run, observing an external cancel token.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::run`].
    pub async fn run_with_cancel(
        &self,
        run_id: impl Into<String>,
        initial_input: serde_json::Value,
        graph: &DependencyGraph,
        cancel: Arc<CancelToken>,
    ) -> Result<RunResult, ConductorError> {
        let run_id = run_id.into();
        let run_id = if run_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            run_id
        };

        let board = self.register(&run_id, graph)?;
        let result = self
            .drive(&run_id, initial_input, graph, cancel, &board)
            .await;
        board.finished.store(true, Ordering::SeqCst);
        result
    }

    fn register(
        &self,
        run_id: &str,
        graph: &DependencyGraph,
    ) -> Result<Arc<StatusBoard>, ConductorError> {
        let board = Arc::new(StatusBoard::default());
        for name in graph.stage_names() {
            board.set(name, StageState::Pending);
        }

        // The entry guard holds the shard lock, so two callers racing on
        // the same id cannot both be admitted.
        match self.runs.entry(run_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().finished.load(Ordering::SeqCst) {
                    return Err(ConductorError::RunInProgress(run_id.to_string()));
                }
                occupied.insert(Arc::clone(&board));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&board));
            }
        }
        Ok(board)
    }

    async fn drive(
        &self,
        run_id: &str,
        initial_input: serde_json::Value,
        graph: &DependencyGraph,
        cancel: Arc<CancelToken>,
        board: &StatusBoard,
    ) -> Result<RunResult, ConductorError> {
        let ctx = RunContext::with_cancel_token(run_id, cancel);

        // Preload prior checkpoints so resume decisions need no further
        // store reads.
        let mut prior: HashMap<String, CheckpointRecord> = HashMap::new();
        for record in self.store.list(run_id).await? {
            prior.insert(record.stage.clone(), record);
        }
        if !prior.is_empty() {
            tracing::info!(
                run_id,
                pipeline = graph.name(),
                prior = prior.len(),
                "resuming run with existing checkpoints"
            );
        }

        let mut errors: BTreeMap<String, StageError> = BTreeMap::new();
        let mut first_error: Option<StageError> = None;
        let mut run_status = RunStatus::Completed;

        tracing::info!(
            run_id,
            pipeline = graph.name(),
            groups = graph.groups_in_order().len(),
            stages = graph.stage_count(),
            "run starting"
        );

        'groups: for (group_index, group) in graph.groups_in_order().iter().enumerate() {
            if ctx.cancel_token().is_cancelled() {
                tracing::info!(run_id, group_index, "cancellation observed at group boundary");
                run_status = RunStatus::Cancelled;
                break;
            }

            let outcome = self
                .resolve_group(run_id, group, group_index, &initial_input, &ctx, board, &prior)
                .await?;

            for (stage, error) in outcome.failures {
                if first_error.is_none() {
                    first_error = Some(error.clone());
                }
                errors.insert(stage, error);
            }

            if outcome.cancelled {
                run_status = RunStatus::Cancelled;
                break 'groups;
            }

            if outcome.failed {
                run_status = RunStatus::Failed;
                if group.policy() == FailurePolicy::FailFast {
                    tracing::warn!(
                        run_id,
                        group_index,
                        "fail-fast group failed; aborting run"
                    );
                    break 'groups;
                }
            }
        }

        let stages: BTreeMap<String, StageState> = board
            .snapshot()
            .into_iter()
            .map(|(name, state)| match state {
                // Nothing is left Running once the run stops.
                StageState::Running => (name, StageState::Cancelled),
                _ => (name, state),
            })
            .collect();

        tracing::info!(run_id, status = ?run_status, "run finished");

        Ok(RunResult {
            run_id: run_id.to_string(),
            status: run_status,
            stages,
            errors,
            first_error,
        })
    }

    /// Resolves every stage in one group: replay, skip, or execute.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_group(
        &self,
        run_id: &str,
        group: &ExecutionGroup,
        group_index: usize,
        initial_input: &serde_json::Value,
        ctx: &RunContext,
        board: &StatusBoard,
        prior: &HashMap<String, CheckpointRecord>,
    ) -> Result<GroupOutcome, ConductorError> {
        let mut outcome = GroupOutcome::default();
        let mut to_run: Vec<&StageDescriptor> = Vec::new();

        for descriptor in group.stages() {
            let name = descriptor.name();

            if let Some(record) = prior.get(name) {
                if record.status == CheckpointStatus::Succeeded {
                    tracing::info!(run_id, stage = name, "replaying checkpointed output");
                    board.set(name, StageState::Replayed);
                    ctx.record_output(
                        name,
                        record.output.clone().unwrap_or(serde_json::Value::Null),
                    );
                    continue;
                }
                // Failed, Skipped, Cancelled and Pending records are all
                // eligible to re-run; fall through.
            }

            if let Some(blocker) = self.blocking_dependency(descriptor, ctx) {
                let reason = format!("dependency '{blocker}' did not succeed");
                tracing::warn!(run_id, stage = name, %reason, "skipping stage");
                board.set(name, StageState::Skipped);
                self.store
                    .put(CheckpointRecord::skipped(run_id, name, reason))
                    .await?;
                continue;
            }

            to_run.push(descriptor);
        }

        if to_run.is_empty() {
            return Ok(outcome);
        }

        let bound = self.max_parallelism.min(to_run.len());
        let semaphore = Semaphore::new(bound);
        tracing::debug!(
            run_id,
            group_index,
            stages = to_run.len(),
            bound,
            "executing group"
        );

        let mut in_flight: FuturesUnordered<_> = to_run
            .into_iter()
            .map(|descriptor| {
                let semaphore = &semaphore;
                let runner = &self.runner;
                async move {
                    // Semaphore is never closed while the group runs.
                    let _permit = semaphore.acquire().await.ok();
                    board.set(descriptor.name(), StageState::Running);

                    let result = match ctx.assemble_input(descriptor.dependencies(), initial_input)
                    {
                        Some(input) => runner.run(descriptor, &input, ctx).await,
                        None => StageResult::failure(StageError::fatal(
                            "dependency output missing from run context",
                        )),
                    };
                    (descriptor.name(), result)
                }
            })
            .collect();

        while let Some((name, result)) = in_flight.next().await {
            if let Err(error) = self
                .store
                .put(CheckpointRecord::from_result(run_id, name, &result))
                .await
            {
                // The outcome is not durable, so the stage must not be
                // reported as succeeded.
                board.set(name, StageState::Failed);
                tracing::error!(
                    run_id,
                    stage = name,
                    error = %StageError::store_unavailable(error.to_string()),
                    "checkpoint write failed; aborting run"
                );
                return Err(error.into());
            }

            match result.outcome {
                Outcome::Success => {
                    board.set(name, StageState::Succeeded);
                    ctx.record_output(
                        name,
                        result.output.unwrap_or(serde_json::Value::Null),
                    );
                }
                Outcome::Failure => {
                    board.set(name, StageState::Failed);
                    outcome.failed = true;
                    let error = result
                        .error
                        .unwrap_or_else(|| StageError::fatal("stage failed without detail"));
                    outcome.failures.push((name.to_string(), error));
                }
                Outcome::Cancelled => {
                    board.set(name, StageState::Cancelled);
                    outcome.cancelled = true;
                }
            }
        }

        Ok(outcome)
    }

    /// Returns the first dependency that did not resolve to an output.
    fn blocking_dependency<'a>(
        &self,
        descriptor: &'a StageDescriptor,
        ctx: &RunContext,
    ) -> Option<&'a str> {
        descriptor
            .dependencies()
            .iter()
            .find(|dep| !ctx.has_output(dep))
            .map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct GroupOutcome {
    failed: bool,
    cancelled: bool,
    failures: Vec<(String, StageError)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::stage::NoOpStage;
    use crate::testing::{MockStage, RecordingStage};
    use pretty_assertions::assert_eq;

    fn orchestrator() -> (PipelineOrchestrator, Arc<MemoryCheckpointStore>) {
        let store = Arc::new(MemoryCheckpointStore::new());
        (
            PipelineOrchestrator::new(store.clone() as Arc<dyn CheckpointStore>),
            store,
        )
    }

    fn descriptor(name: &str) -> StageDescriptor {
        StageDescriptor::new(name, Arc::new(NoOpStage::new()))
    }

    #[tokio::test]
    async fn single_stage_run_completes() {
        let (orchestrator, store) = orchestrator();
        let graph = DependencyGraph::builder("p")
            .stages([descriptor("a")])
            .build()
            .unwrap();

        let result = orchestrator
            .run("r1", serde_json::json!({"seed": 1}), &graph)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.state_of("a"), Some(StageState::Succeeded));
        let record = store.get("r1", "a").await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Succeeded);
    }

    #[tokio::test]
    async fn dependent_stage_receives_keyed_outputs() {
        let (orchestrator, _) = orchestrator();
        let recorder = Arc::new(RecordingStage::new());
        let graph = DependencyGraph::builder("p")
            .stages([StageDescriptor::new(
                "a",
                Arc::new(MockStage::succeeding_with(serde_json::json!("script text"))),
            )])
            .stages([StageDescriptor::new("b", recorder.clone()).with_dependency("a")])
            .build()
            .unwrap();

        orchestrator
            .run("r1", serde_json::json!({"idea": "x"}), &graph)
            .await
            .unwrap();

        assert_eq!(
            recorder.inputs(),
            vec![serde_json::json!({"a": "script text"})]
        );
    }

    #[tokio::test]
    async fn root_stages_receive_the_initial_input() {
        let (orchestrator, _) = orchestrator();
        let recorder = Arc::new(RecordingStage::new());
        let graph = DependencyGraph::builder("p")
            .stages([StageDescriptor::new("a", recorder.clone())])
            .build()
            .unwrap();

        orchestrator
            .run("r1", serde_json::json!({"idea": "volcanoes"}), &graph)
            .await
            .unwrap();

        assert_eq!(recorder.inputs(), vec![serde_json::json!({"idea": "volcanoes"})]);
    }

    #[tokio::test]
    async fn duplicate_run_id_is_rejected_while_in_progress() {
        let (orchestrator, _) = orchestrator();
        let graph = DependencyGraph::builder("p")
            .stages([descriptor("a")])
            .build()
            .unwrap();

        // A finished run frees the id for reuse (that is how resume works).
        orchestrator
            .run("r1", serde_json::Value::Null, &graph)
            .await
            .unwrap();
        let again = orchestrator.run("r1", serde_json::Value::Null, &graph).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn status_reports_pending_before_and_terminal_after() {
        let (orchestrator, _) = orchestrator();
        let graph = DependencyGraph::builder("p")
            .stages([descriptor("a")])
            .build()
            .unwrap();

        assert!(orchestrator.status("r1").is_none());
        orchestrator
            .run("r1", serde_json::Value::Null, &graph)
            .await
            .unwrap();

        let snapshot = orchestrator.status("r1").unwrap();
        assert_eq!(snapshot.get("a"), Some(&StageState::Succeeded));
    }

    #[tokio::test]
    async fn generated_run_id_when_caller_supplies_none() {
        let (orchestrator, _) = orchestrator();
        let graph = DependencyGraph::builder("p")
            .stages([descriptor("a")])
            .build()
            .unwrap();

        let result = orchestrator
            .run("", serde_json::Value::Null, &graph)
            .await
            .unwrap();
        assert!(!result.run_id.is_empty());
    }
}
