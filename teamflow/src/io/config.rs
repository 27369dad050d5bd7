//! Engine configuration stored as TOML (default path `teamflow.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Destination;
use crate::core::validator::ValidatorPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "teamflow.toml";

/// Engine configuration (TOML).
///
/// Every table is optional; missing fields default to the values a fresh
/// `teamflow init-config` writes. Immutable once handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub run: RunConfig,
    pub supervisor: SupervisorConfig,
    pub oracle: OracleConfig,
    pub sandbox: SandboxConfig,
    pub validator: ValidatorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Iteration bound used when a request does not set one.
    pub max_iterations: u32,
    /// Message window used when a request does not set one.
    pub message_window: usize,
    /// Destinations the supervisor may choose. Must include `Finish`.
    pub destinations: Vec<Destination>,
    /// Upper bound on query length, in characters.
    pub max_query_chars: usize,
    /// Largest `max_iterations` a request may ask for.
    pub max_iterations_cap: u32,
    /// Largest `message_window` a request may ask for.
    pub message_window_cap: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            message_window: 8,
            destinations: Destination::ALL.to_vec(),
            max_query_chars: 5_000,
            max_iterations_cap: 50,
            message_window_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Finish once analysis and strategy are both in the window, and never
    /// re-run the strategist when a strategy already exists.
    pub completion_guards: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            completion_guards: true,
        }
    }
}

/// Retry and timeout policy shared by the oracle and the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Immediate retries after malformed output (oracle only).
    pub max_malformed_retries: u32,
    /// Retries after transport failures, with exponential backoff.
    pub max_transport_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, table: &str) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("{table}.retry.timeout_secs must be > 0"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(anyhow!(
                "{table}.retry.initial_backoff_ms must be <= max_backoff_ms"
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_malformed_retries: 2,
            max_transport_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Agent CLI invocation. `{schema}` and `{output}` are replaced with
    /// per-call scratch paths; the prompt is piped on stdin.
    pub command: Vec<String>,
    /// Rendered prompts are trimmed to this many bytes.
    pub prompt_budget_bytes: usize,
    pub output_limit_bytes: usize,
    pub retry: RetryConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            prompt_budget_bytes: 40_000,
            output_limit_bytes: 100_000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter invocation; validated code is piped on stdin.
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
    pub retry: RetryConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "-I".to_string(), "-".to_string()],
            output_limit_bytes: 20_000,
            retry: RetryConfig {
                timeout_secs: 30,
                ..RetryConfig::default()
            },
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let run = &self.run;
        if run.max_iterations == 0 {
            return Err(anyhow!("run.max_iterations must be > 0"));
        }
        if run.message_window == 0 {
            return Err(anyhow!("run.message_window must be > 0"));
        }
        if run.max_query_chars == 0 {
            return Err(anyhow!("run.max_query_chars must be > 0"));
        }
        if run.max_iterations > run.max_iterations_cap {
            return Err(anyhow!("run.max_iterations must be <= run.max_iterations_cap"));
        }
        if run.message_window > run.message_window_cap {
            return Err(anyhow!("run.message_window must be <= run.message_window_cap"));
        }
        if !run.destinations.contains(&Destination::Finish) {
            return Err(anyhow!("run.destinations must include Finish"));
        }
        validate_command("oracle.command", &self.oracle.command)?;
        validate_command("sandbox.command", &self.sandbox.command)?;
        if self.oracle.prompt_budget_bytes == 0 {
            return Err(anyhow!("oracle.prompt_budget_bytes must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        self.oracle.retry.validate("oracle")?;
        self.sandbox.retry.validate("sandbox")?;
        Ok(())
    }
}

fn validate_command(name: &str, command: &[String]) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::ValidatorMode;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("teamflow.toml");
        let cfg = EngineConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("teamflow.toml");
        fs::write(
            &path,
            "[run]\nmax_iterations = 4\n\n[validator]\nmode = \"denylist\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run.max_iterations, 4);
        assert_eq!(cfg.run.message_window, 8);
        assert_eq!(cfg.validator.mode, ValidatorMode::Denylist);
        assert!(cfg.validator.denied_modules.contains(&"os".to_string()));
        assert!(cfg.supervisor.completion_guards);
    }

    #[test]
    fn destinations_without_finish_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("teamflow.toml");
        fs::write(&path, "[run]\ndestinations = [\"Data_Analyst\"]\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("must include Finish"));
    }

    #[test]
    fn empty_commands_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.sandbox.command.clear();
        assert!(cfg.validate().is_err());
    }
}
