//! Supervisor/worker workflow engine with a static code-safety gate.
//!
//! A run routes one user request through two workers (Data_Analyst and
//! Business_Strategist) under a supervisor that decides, step by step, who
//! acts next and when the run is done. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (shared state, events, routing
//!   guards, code-safety validation, query screening). No I/O.
//! - **[`io`]**: Side-effecting boundaries (configuration, oracle and sandbox
//!   adapters, child processes, prompt rendering).
//!
//! [`agents`] and [`engine`] coordinate the two to produce a run's event stream.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
