//! Exponential backoff schedule and hang guard for transport retries.

use std::time::Duration;

use crate::io::config::RetryConfig;

/// Extra time a caller allows beyond a process-backed call's own timeout, so
/// the process reports its timeout before the caller gives up on it.
pub const HANG_GRACE: Duration = Duration::from_secs(5);

/// How long a caller waits on one attempt before treating it as hung.
pub fn hang_guard(config: &RetryConfig) -> Duration {
    config.timeout() + HANG_GRACE
}

/// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(20);
    let delay = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay)
}
