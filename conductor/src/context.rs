//! Per-run mutable state and cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Token for coordinating cancellation across the stages of one run.
///
/// Cancellation is cooperative: the orchestrator checks the token at
/// group boundaries and the runner races it against in-flight work.
pub struct CancelToken {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason.lock())
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

impl CancelToken {
    /// Creates a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Requests cancellation. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            *self.reason.lock() = Some(reason.into());
        }
        self.notify.notify_waiters();
    }

    /// Resolves when cancellation is requested.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Mutable state owned by one orchestrator invocation.
///
/// Maps resolved stage names to their output payloads and carries the
/// cancellation signal shared by every stage in the run. Each stage name
/// is written at most once per run, so writers never contend on the same
/// entry.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    outputs: RwLock<HashMap<String, serde_json::Value>>,
    cancel: Arc<CancelToken>,
}

impl RunContext {
    /// Creates a fresh context for a run.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            outputs: RwLock::new(HashMap::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Creates a context sharing an externally owned cancel token.
    #[must_use]
    pub fn with_cancel_token(run_id: impl Into<String>, cancel: Arc<CancelToken>) -> Self {
        Self {
            run_id: run_id.into(),
            outputs: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the shared cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    /// Records a stage's resolved output.
    pub fn record_output(&self, stage: impl Into<String>, output: serde_json::Value) {
        self.outputs.write().insert(stage.into(), output);
    }

    /// Returns a stage's resolved output, if present.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<serde_json::Value> {
        self.outputs.read().get(stage).cloned()
    }

    /// Returns true if the named stage has a resolved output.
    #[must_use]
    pub fn has_output(&self, stage: &str) -> bool {
        self.outputs.read().contains_key(stage)
    }

    /// Assembles the input payload for a stage from its dependencies.
    ///
    /// A stage with no declared dependencies receives the run's initial
    /// input; otherwise it receives a JSON object keyed by dependency
    /// name. Returns `None` if a dependency output is missing.
    #[must_use]
    pub fn assemble_input(
        &self,
        dependencies: &[String],
        initial_input: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        if dependencies.is_empty() {
            return Some(initial_input.clone());
        }

        let outputs = self.outputs.read();
        let mut input = serde_json::Map::with_capacity(dependencies.len());
        for dep in dependencies {
            input.insert(dep.clone(), outputs.get(dep)?.clone());
        }
        Some(serde_json::Value::Object(input))
    }
}
