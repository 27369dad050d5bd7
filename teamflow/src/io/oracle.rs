//! Decision oracle boundary: the trait the engine consults and the
//! process-backed implementation the CLI uses.
//!
//! Oracle output is JSON. Every response is checked against the JSON schema of
//! the task that requested it before any field is read, so a response either
//! matches the contract exactly or is reported as malformed.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Message;
use crate::error::OracleError;
use crate::io::config::OracleConfig;
use crate::io::process::{command_from_argv, kill_switch, run_command_with_timeout};

const ROUTING_SCHEMA: &str = include_str!("../../schemas/routing_decision.schema.json");
const ANALYSIS_SCHEMA: &str = include_str!("../../schemas/analysis_plan.schema.json");
const STRATEGY_SCHEMA: &str = include_str!("../../schemas/strategy.schema.json");

const SCHEMA_PLACEHOLDER: &str = "{schema}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// What the oracle is being asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleTask {
    /// A routing decision `{next, reasoning}`.
    Route,
    /// An analysis plan `{summary, code}`.
    Analyze,
    /// A strategy `{actions, summary}`.
    Strategize,
}

impl OracleTask {
    pub fn as_str(self) -> &'static str {
        match self {
            OracleTask::Route => "route",
            OracleTask::Analyze => "analyze",
            OracleTask::Strategize => "strategize",
        }
    }

    /// JSON schema the response must satisfy.
    pub fn schema(self) -> &'static str {
        match self {
            OracleTask::Route => ROUTING_SCHEMA,
            OracleTask::Analyze => ANALYSIS_SCHEMA,
            OracleTask::Strategize => STRATEGY_SCHEMA,
        }
    }
}

/// One oracle consultation.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub task: OracleTask,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// The windowed conversation the prompt was rendered from.
    pub context: Vec<Message>,
}

/// Reasoning backend consulted for routing decisions and worker output.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError>;
}

/// Compiled response schemas, one per [`OracleTask`].
pub struct OutputSchemas {
    route: Validator,
    analyze: Validator,
    strategize: Validator,
}

impl OutputSchemas {
    pub fn compile() -> Result<Self> {
        Ok(Self {
            route: compile_schema(OracleTask::Route)?,
            analyze: compile_schema(OracleTask::Analyze)?,
            strategize: compile_schema(OracleTask::Strategize)?,
        })
    }

    /// Check a response against the task's schema.
    pub fn check(&self, task: OracleTask, response: &Value) -> Result<(), OracleError> {
        let validator = match task {
            OracleTask::Route => &self.route,
            OracleTask::Analyze => &self.analyze,
            OracleTask::Strategize => &self.strategize,
        };
        let messages: Vec<String> = validator
            .iter_errors(response)
            .map(|err| err.to_string())
            .collect();
        if messages.is_empty() {
            return Ok(());
        }
        Err(OracleError::Malformed(format!(
            "{} response violates schema: {}",
            task.as_str(),
            messages.join("; ")
        )))
    }
}

impl std::fmt::Debug for OutputSchemas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchemas").finish_non_exhaustive()
    }
}

fn compile_schema(task: OracleTask) -> Result<Validator> {
    let schema: Value = serde_json::from_str(task.schema())
        .with_context(|| format!("parse {} schema", task.as_str()))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .with_context(|| format!("compile {} schema", task.as_str()))
}

/// Parse raw oracle text as a single JSON document.
pub fn parse_json_output(raw: &str) -> Result<Value, OracleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(OracleError::Malformed("empty response".to_string()));
    }
    serde_json::from_str(trimmed)
        .map_err(|err| OracleError::Malformed(format!("response is not valid JSON: {err}")))
}

/// Oracle that spawns an agent CLI per consultation (default `codex exec`).
///
/// The prompt is piped on stdin. `{schema}` in the command is replaced with a
/// scratch file holding the task schema and `{output}` with the path the agent
/// writes its final message to; without `{output}` the response is read from
/// stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.retry.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

#[async_trait]
impl DecisionOracle for CommandOracle {
    #[instrument(skip_all, fields(task = request.task.as_str(), prompt_bytes = request.prompt.len()))]
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let command = self.command.clone();
        let prompt = request.prompt.clone();
        let task = request.task;
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;
        let (cancel, _kill_on_drop) = kill_switch();
        tokio::task::spawn_blocking(move || {
            run_oracle_command(&command, task, &prompt, timeout, limit, &cancel)
        })
        .await
        .map_err(|err| OracleError::Transport(format!("oracle task failed: {err}")))?
    }
}

fn run_oracle_command(
    command: &[String],
    task: OracleTask,
    prompt: &str,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<Value, OracleError> {
    let transport = |err: anyhow::Error| OracleError::Transport(format!("{err:#}"));

    let scratch = tempfile::tempdir()
        .context("create oracle scratch dir")
        .map_err(transport)?;
    let schema_path = scratch.path().join("schema.json");
    let output_path = scratch.path().join("output.json");
    fs::write(&schema_path, task.schema())
        .with_context(|| format!("write schema {}", schema_path.display()))
        .map_err(transport)?;

    let reads_output_file = command.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER));
    let argv = substitute_placeholders(command, &schema_path, &output_path);
    let cmd = command_from_argv(&argv).map_err(transport)?;

    info!(program = %argv[0], "consulting oracle");
    let output = run_command_with_timeout(
        cmd,
        Some(prompt.as_bytes()),
        timeout,
        output_limit_bytes,
        cancel,
    )
    .map_err(transport)?;
    if !output.succeeded() {
        let summary = output.failure_summary(timeout);
        warn!(%summary, "oracle command failed");
        return Err(OracleError::Transport(format!("oracle command {summary}")));
    }

    let raw = if reads_output_file {
        fs::read_to_string(&output_path).map_err(|err| {
            OracleError::Malformed(format!(
                "oracle did not write {}: {err}",
                output_path.display()
            ))
        })?
    } else {
        output.stdout_text()
    };
    debug!(bytes = raw.len(), "oracle responded");
    parse_json_output(&raw)
}

fn substitute_placeholders(command: &[String], schema_path: &Path, output_path: &Path) -> Vec<String> {
    let schema = schema_path.display().to_string();
    let output = output_path.display().to_string();
    command
        .iter()
        .map(|arg| {
            arg.replace(SCHEMA_PLACEHOLDER, &schema)
                .replace(OUTPUT_PLACEHOLDER, &output)
        })
        .collect()
}
