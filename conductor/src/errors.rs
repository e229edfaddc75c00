//! Error types for the conductor orchestration core.
//!
//! Stage-level failures are carried as data (`StageError` inside a
//! `StageResult`) and never cross the orchestrator boundary as `Err`.
//! Configuration and store failures use dedicated `thiserror` enums.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure.
///
/// The kind decides retry behavior: `Retryable` and `Timeout` are retried
/// per the stage's policy, everything else fails the attempt sequence
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input validation failed. Never retried.
    InvalidInput,
    /// Transient failure (network, external API, subprocess flake).
    Retryable,
    /// Programming or logic error surfaced by a stage. Never retried.
    Fatal,
    /// The stage exceeded its timeout. Retried unless attempts are spent.
    Timeout,
    /// The run's cancellation signal fired while the stage was in flight.
    Cancelled,
    /// The checkpoint store could not persist a record. Fatal to the run.
    StoreUnavailable,
}

impl ErrorKind {
    /// Returns true if a failure of this kind may be re-attempted.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InvalidInput => "invalid_input",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::StoreUnavailable => "store_unavailable",
        };
        f.write_str(label)
    }
}

/// A structured stage failure: classification plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    /// The failure classification.
    pub kind: ErrorKind,
    /// Description of what went wrong.
    pub message: String,
}

impl StageError {
    /// Creates a stage error with an explicit kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Creates a `Retryable` error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    /// Creates a `Fatal` error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates a `Cancelled` error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Creates a `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreUnavailable, message)
    }

    /// Returns true if this error may be re-attempted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Error raised while assembling a `DependencyGraph`.
///
/// All variants are construction-time failures: a graph that builds
/// successfully cannot hit them at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two stages share a name.
    #[error("duplicate stage name '{name}'")]
    DuplicateStage {
        /// The repeated name.
        name: String,
    },

    /// A stage depends on a name that is not defined in any earlier group.
    #[error(
        "stage '{stage}' depends on '{dependency}', which is not defined in an earlier group"
    )]
    DependencyNotEarlier {
        /// The dependent stage.
        stage: String,
        /// The offending dependency name.
        dependency: String,
    },

    /// A group was added with no stages in it.
    #[error("execution group {index} contains no stages")]
    EmptyGroup {
        /// Zero-based index of the empty group.
        index: usize,
    },

    /// The graph was built with no groups at all.
    #[error("pipeline contains no execution groups")]
    EmptyGraph,
}

/// Error raised by a checkpoint store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("checkpoint store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be (de)serialized.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error for orchestrator entry points.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Graph construction failed.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// The checkpoint store failed; resume would be unsafe.
    #[error("checkpoint store unavailable: {0}")]
    Store(#[from] StoreError),

    /// A run id was reused while a run with that id is still in progress.
    #[error("run '{0}' is already in progress")]
    RunInProgress(String),
}
