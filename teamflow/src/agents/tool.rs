//! The analysis tool: validate, then execute in the sandbox.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::core::types::{ToolInvocation, ValidationResult};
use crate::core::validator::CodeSafetyValidator;
use crate::error::{EngineError, SandboxError};
use crate::io::config::RetryConfig;
use crate::io::retry::{backoff_delay, hang_guard};
use crate::io::sandbox::SandboxExecutor;

pub struct AnalysisTool {
    validator: CodeSafetyValidator,
    sandbox: Arc<dyn SandboxExecutor>,
    retry: RetryConfig,
}

impl AnalysisTool {
    pub fn new(
        validator: CodeSafetyValidator,
        sandbox: Arc<dyn SandboxExecutor>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            validator,
            sandbox,
            retry,
        }
    }

    /// Validate `code` and, when allowed, run it exactly once.
    ///
    /// Denials and execution failures come back inside the [`ToolInvocation`];
    /// only an unreachable sandbox (after retries) is an error.
    #[instrument(skip_all, fields(code_bytes = code.len()))]
    pub async fn execute_analysis(&self, code: &str) -> Result<ToolInvocation, EngineError> {
        let validation = self.validator.validate(code);
        if !validation.allowed {
            warn!(reason = validation.reason.as_deref().unwrap_or_default(), "analysis code rejected");
            return Ok(invocation(code, validation, None, None));
        }

        match self.run_with_retry(code).await? {
            Ok(output) => {
                info!(output_bytes = output.len(), "analysis code executed");
                Ok(invocation(code, validation, Some(output), None))
            }
            Err(failure) => Ok(invocation(code, validation, None, Some(failure))),
        }
    }

    /// Outer `Err` is fatal; inner `Err` is an execution failure to report.
    async fn run_with_retry(&self, code: &str) -> Result<Result<String, String>, EngineError> {
        let guard = hang_guard(&self.retry);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(guard, self.sandbox.execute(code)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SandboxError::Transport(format!(
                    "sandbox did not respond within {}s",
                    guard.as_secs_f64()
                ))),
            };
            match outcome {
                Ok(output) => return Ok(Ok(output)),
                Err(SandboxError::Execution(detail)) => return Ok(Err(detail)),
                Err(SandboxError::Transport(detail)) => {
                    if attempts > self.retry.max_transport_retries {
                        return Err(EngineError::TransportFailure {
                            target: "sandbox",
                            attempts,
                            detail,
                        });
                    }
                    let delay = backoff_delay(&self.retry, attempts);
                    warn!(%detail, retry = attempts, delay_ms = delay.as_millis() as u64, "sandbox transport failure, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn invocation(
    code: &str,
    validation: ValidationResult,
    execution_output: Option<String>,
    error: Option<String>,
) -> ToolInvocation {
    ToolInvocation {
        requested_code: code.to_string(),
        validation,
        execution_output,
        error,
    }
}
