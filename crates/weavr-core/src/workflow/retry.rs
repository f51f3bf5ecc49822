//! Per-step retry policy.
//!
//! Linear backoff, `delay_ms * attempt`, distinct from the run queue's
//! exponential backoff in `worker.rs`. A step's `retry.attempts` counts
//! total tries, not retries, so `attempts = 1` (the default) means no
//! retry at all.

use std::time::Duration;

use weavr_types::workflow::RetryConfig;

/// Whether a step should be retried after failing on `attempt` (1-based:
/// the first failure is attempt 1).
pub fn should_retry(config: &RetryConfig, attempt: u32) -> bool {
    attempt < config.attempts
}

/// Delay before the next attempt, given the attempt that just failed.
pub fn next_delay(config: &RetryConfig, attempt: u32) -> Duration {
    Duration::from_millis(config.delay_ms.saturating_mul(attempt as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_never_retries() {
        let config = RetryConfig::default();
        assert!(!should_retry(&config, 1));
    }

    #[test]
    fn retries_until_attempts_exhausted() {
        let config = RetryConfig {
            attempts: 3,
            delay_ms: 1000,
        };
        assert!(should_retry(&config, 1));
        assert!(should_retry(&config, 2));
        assert!(!should_retry(&config, 3));
    }

    #[test]
    fn delay_scales_linearly_with_attempt() {
        let config = RetryConfig {
            attempts: 3,
            delay_ms: 500,
        };
        assert_eq!(next_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(next_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(next_delay(&config, 3), Duration::from_millis(1500));
    }
}
