//! Subprocess-backed stage implementation.
//!
//! Runs a stage whose logic lives in an external program (typically a
//! Python script driving an ML model). The input payload is written to
//! the child's stdin as JSON; stdout is parsed as the output payload.
//! A non-zero exit is classified as retryable (external tooling flakes),
//! a failure to spawn as fatal.

use crate::context::RunContext;
use crate::errors::StageError;
use crate::stage::{Stage, StageResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A stage that delegates execution to an external command.
#[derive(Debug, Clone)]
pub struct SubprocessStage {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl SubprocessStage {
    /// Creates a subprocess stage for the given program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory for the child.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    async fn run_child(&self, input: &serde_json::Value) -> Result<serde_json::Value, StageError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| StageError::fatal(format!("failed to spawn '{}': {e}", self.program)))?;

        let payload = serde_json::to_vec(input)
            .map_err(|e| StageError::fatal(format!("input does not serialize: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| StageError::retryable(format!("writing child stdin: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StageError::retryable(format!("waiting for child: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::retryable(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| StageError::fatal(format!("child stdout is not valid JSON: {e}")))
    }
}

#[async_trait]
impl Stage for SubprocessStage {
    async fn execute(&self, input: &serde_json::Value, ctx: &RunContext) -> StageResult {
        // kill_on_drop reaps the child if cancellation wins the race.
        tokio::select! {
            result = self.run_child(input) => match result {
                Ok(output) => StageResult::success(output),
                Err(error) => StageResult::failure(error),
            },
            () = ctx.cancel_token().cancelled() => StageResult::cancelled(),
        }
    }
}
