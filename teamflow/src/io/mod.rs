//! I/O boundaries for the workflow engine.

pub mod config;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod sandbox;
