//! # Conductor
//!
//! Checkpointed, dependency-ordered stage orchestration for
//! content-generation pipelines.
//!
//! Conductor runs heterogeneous processing stages (script generation,
//! TTS, image/video synthesis, post-production) as a sequence of
//! execution groups: groups run strictly in order, stages within a
//! group run concurrently up to a bound. Every stage outcome is
//! persisted as a checkpoint, so a crashed or interrupted run can be
//! resumed without repeating expensive work that already completed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor::prelude::*;
//! use std::sync::Arc;
//!
//! let graph = DependencyGraph::builder("shorts")
//!     .stages([StageDescriptor::new("script", Arc::new(script_stage))])
//!     .stages([
//!         StageDescriptor::new("voice", Arc::new(voice_stage)).with_dependency("script"),
//!         StageDescriptor::new("images", Arc::new(image_stage)).with_dependency("script"),
//!     ])
//!     .stages([StageDescriptor::new("render", Arc::new(render_stage))
//!         .with_dependencies(["voice", "images"])])
//!     .build()?;
//!
//! let store = Arc::new(FileCheckpointStore::new("checkpoints"));
//! let orchestrator = PipelineOrchestrator::new(store);
//! let result = orchestrator.run("run-42", initial_input, &graph).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod context;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        CheckpointRecord, CheckpointStatus, CheckpointStore, FileCheckpointStore,
        MemoryCheckpointStore,
    };
    pub use crate::context::{CancelToken, RunContext};
    pub use crate::errors::{ConductorError, ErrorKind, GraphError, StageError, StoreError};
    pub use crate::graph::{
        DependencyGraph, ExecutionGroup, FailurePolicy, GraphBuilder, StageDescriptor,
    };
    pub use crate::observability::init_tracing;
    pub use crate::orchestrator::{PipelineOrchestrator, RunResult, RunStatus, StageState};
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
    pub use crate::runner::StageRunner;
    pub use crate::stage::{
        FnStage, NoOpStage, Outcome, Stage, StageResult, SubprocessStage, Typed, TypedStage,
    };
}
