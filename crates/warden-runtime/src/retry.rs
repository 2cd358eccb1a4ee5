//! Reconnect budget.

use std::time::Duration;
use warden_kernel::config::StoreConfig;

/// How many consecutive failures are tolerated and how long to wait
/// between attempts. The delay is the same for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failures after which the budget is exhausted.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl From<&StoreConfig> for RetryConfig {
    fn from(config: &StoreConfig) -> Self {
        Self::fixed(config.max_reconnect_attempts, config.reconnect_delay())
    }
}
