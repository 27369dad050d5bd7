//! The workflow engine: drives the supervisor and workers to completion and
//! emits the run's lifecycle events as a stream.
//!
//! Each call to [`WorkflowEngine::run`] owns a fresh [`SharedState`]. The
//! state is only mutated inside the stream body after an awaited oracle or
//! worker result has been observed, so a cancelled call leaves it untouched.

use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::analyst::DataAnalyst;
use crate::agents::strategist::BusinessStrategist;
use crate::agents::supervisor::Supervisor;
use crate::agents::tool::AnalysisTool;
use crate::agents::{OracleClient, Workers};
use crate::core::events::{BOUND_REACHED_MARKER, RunEvent};
use crate::core::state::SharedState;
use crate::core::validator::CodeSafetyValidator;
use crate::error::EngineError;
use crate::io::config::{EngineConfig, RunConfig};
use crate::io::oracle::DecisionOracle;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::SandboxExecutor;

/// Reasoning recorded on the forced `Finish` when the iteration bound is hit.
const BOUND_REASONING: &str = "Maximum iterations reached. Terminating workflow.";

/// One user request. Unset bounds fall back to the `[run]` config defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub query: String,
    pub max_iterations: Option<u32>,
    pub message_window: Option<usize>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_iterations: None,
            message_window: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_message_window(mut self, message_window: usize) -> Self {
        self.message_window = Some(message_window);
        self
    }

    /// Check the request against the configured limits and return the
    /// effective `(max_iterations, message_window)`.
    pub fn resolve(&self, run: &RunConfig) -> Result<(u32, usize), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidRequest(msg));

        if self.query.trim().is_empty() {
            return invalid("query must not be empty".to_string());
        }
        let chars = self.query.chars().count();
        if chars > run.max_query_chars {
            return invalid(format!(
                "query is {chars} characters, limit is {}",
                run.max_query_chars
            ));
        }
        let max_iterations = self.max_iterations.unwrap_or(run.max_iterations);
        if !(1..=run.max_iterations_cap).contains(&max_iterations) {
            return invalid(format!(
                "max_iterations must be between 1 and {}",
                run.max_iterations_cap
            ));
        }
        let message_window = self.message_window.unwrap_or(run.message_window);
        if !(1..=run.message_window_cap).contains(&message_window) {
            return invalid(format!(
                "message_window must be between 1 and {}",
                run.message_window_cap
            ));
        }
        Ok((max_iterations, message_window))
    }
}

struct EngineInner {
    config: EngineConfig,
    supervisor: Supervisor,
    workers: Workers,
}

/// Cheap to clone; clones share configuration and the oracle/sandbox handles.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        oracle: Arc<dyn DecisionOracle>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let prompts = PromptBuilder::new(config.oracle.prompt_budget_bytes)?;
        let client = Arc::new(OracleClient::new(
            oracle,
            prompts,
            config.oracle.retry.clone(),
        )?);
        let tool = AnalysisTool::new(
            CodeSafetyValidator::new(&config.validator),
            sandbox,
            config.sandbox.retry.clone(),
        );
        let workers = Workers::new(
            DataAnalyst::new(
                client.clone(),
                tool,
                config.validator.allowed_modules.clone(),
            ),
            BusinessStrategist::new(client.clone()),
        );
        let supervisor = Supervisor::new(
            client,
            config.run.destinations.clone(),
            config.supervisor.completion_guards,
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                supervisor,
                workers,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a run. Request validation happens here, before any event exists.
    ///
    /// The returned stream is lazy: nothing happens until it is polled. It
    /// yields `start` first and exactly one terminal event (`finish` or
    /// `error`) last. Cancelling `cancel` (or dropping the stream) stops the
    /// run at its current step.
    pub fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = RunEvent> + Send + 'static, EngineError> {
        let (max_iterations, message_window) = request.resolve(&self.inner.config.run)?;
        let inner = self.inner.clone();
        let query = request.query;

        Ok(async_stream::stream! {
            let mut state = SharedState::new(&query, max_iterations, message_window);
            info!(max_iterations, message_window, "run started");
            yield RunEvent::start(&query);

            loop {
                if cancel.is_cancelled() {
                    warn!(iteration = state.iteration_count(), "run cancelled");
                    yield RunEvent::error(EngineError::Cancelled.to_string());
                    break;
                }

                if state.bound_reached() {
                    let output = state.force_finish(BOUND_REASONING).to_string();
                    warn!(max_iterations, "iteration bound reached, finishing");
                    yield RunEvent::finish(format!("{BOUND_REACHED_MARKER} {output}"));
                    break;
                }

                let decided = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(EngineError::Cancelled),
                    decision = inner.supervisor.decide(&query, state.window()) => decision,
                };
                let decision = match decided {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(error = %err, "supervisor step failed");
                        yield RunEvent::error(err.to_string());
                        break;
                    }
                };
                if !inner.config.run.destinations.contains(&decision.destination) {
                    let err = EngineError::InvalidDecision {
                        destination: decision.destination,
                    };
                    warn!(error = %err, "rejected routing decision");
                    yield RunEvent::error(err.to_string());
                    break;
                }

                let recorded = state.record_decision(decision);
                let destination = recorded.destination;
                let event = RunEvent::decision(destination, recorded.reasoning.clone());
                info!(iteration = state.iteration_count(), %destination, "decision recorded");
                yield event;

                let worker = match destination.worker() {
                    Some(worker) => worker,
                    None => {
                        let output = state.terminate().to_string();
                        info!(iterations = state.iteration_count(), "run finished");
                        yield RunEvent::finish(output);
                        break;
                    }
                };

                let acted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(EngineError::Cancelled),
                    output = inner.workers.act(worker, &query, state.window()) => output,
                };
                match acted {
                    Ok(output) => {
                        state.record_worker_output(worker, output.clone());
                        yield RunEvent::action(worker, output);
                    }
                    Err(err) => {
                        warn!(error = %err, %worker, "worker step failed");
                        yield RunEvent::error(err.to_string());
                        break;
                    }
                }
            }
        })
    }
}
