//! Stable exit codes for teamflow CLI commands.

/// Run finished, or checked code was allowed.
pub const OK: i32 = 0;
/// Invalid input, request or configuration.
pub const INVALID: i32 = 1;
/// `teamflow check-code` rejected the code.
pub const DENIED: i32 = 2;
/// `teamflow run` ended with an error event.
pub const FAILED: i32 = 3;
