//! Code execution boundary used by the analysis tool.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::SandboxError;
use crate::io::config::SandboxConfig;
use crate::io::process::{command_from_argv, kill_switch, run_command_with_timeout};

/// Runs code that already passed the safety validator.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Execute `code` and return its captured output.
    async fn execute(&self, code: &str) -> Result<String, SandboxError>;
}

/// Sandbox that pipes code into an interpreter process (default `python3 -I -`).
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.retry.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

#[async_trait]
impl SandboxExecutor for ProcessSandbox {
    #[instrument(skip_all, fields(code_bytes = code.len()))]
    async fn execute(&self, code: &str) -> Result<String, SandboxError> {
        let command = self.command.clone();
        let code = code.to_string();
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;
        let (cancel, _kill_on_drop) = kill_switch();
        tokio::task::spawn_blocking(move || run_code(&command, &code, timeout, limit, &cancel))
            .await
            .map_err(|err| SandboxError::Transport(format!("sandbox task failed: {err}")))?
    }
}

fn run_code(
    command: &[String],
    code: &str,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<String, SandboxError> {
    let transport = |err: anyhow::Error| SandboxError::Transport(format!("{err:#}"));
    let cmd = command_from_argv(command).map_err(transport)?;
    let output = run_command_with_timeout(
        cmd,
        Some(code.as_bytes()),
        timeout,
        output_limit_bytes,
        cancel,
    )
    .map_err(transport)?;
    if !output.succeeded() {
        let summary = output.failure_summary(timeout);
        warn!(%summary, "analysis code failed");
        return Err(SandboxError::Execution(summary));
    }
    debug!(stdout_bytes = output.stdout.len(), "analysis code finished");
    Ok(output.stdout_text())
}
