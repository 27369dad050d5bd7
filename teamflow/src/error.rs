//! Typed failures for the engine and its two external boundaries.
//!
//! Validator denials, tool execution failures and the iteration bound are not
//! errors: they are folded into worker output or the `finish` event. Every
//! variant of [`EngineError`] except `InvalidRequest` ends a run with a single
//! `error` event.

use thiserror::Error;

use crate::core::types::Destination;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected by `WorkflowEngine::run` before any event is produced.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("oracle returned malformed output after {attempts} attempt(s): {detail}")]
    OracleMalformed { attempts: u32, detail: String },

    #[error("supervisor chose '{destination}', which is not an enabled destination")]
    InvalidDecision { destination: Destination },

    #[error("{target} unavailable after {attempts} attempt(s): {detail}")]
    TransportFailure {
        target: &'static str,
        attempts: u32,
        detail: String,
    },

    #[error("run cancelled")]
    Cancelled,

    /// Prompt rendering or output encoding failed inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure reported by a [`crate::io::oracle::DecisionOracle`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// Output arrived but could not be used. Retried immediately.
    #[error("malformed oracle output: {0}")]
    Malformed(String),
    /// The oracle could not be reached or did not answer. Retried with backoff.
    #[error("oracle transport failure: {0}")]
    Transport(String),
}

/// Failure reported by a [`crate::io::sandbox::SandboxExecutor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// The code ran and failed. Folded into the analyst output.
    #[error("execution failed: {0}")]
    Execution(String),
    /// The sandbox itself is unavailable. Retried with backoff.
    #[error("sandbox transport failure: {0}")]
    Transport(String),
}
