//! Local retry of transient store faults.
//!
//! Only `StoreError::Unavailable` is retried. Policy failures and permanent
//! store errors are returned on the first attempt.

use std::time::Duration;

use crate::error::{ControlError, Result};

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying transient store faults with backoff.
///
/// # Errors
///
/// Returns the first non-transient error, or `ControlError::Unavailable`
/// once `max_attempts` transient failures have been seen.
pub async fn with_backoff<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(ControlError::Store(err)) if err.is_transient() => {
                if attempt >= policy.max_attempts {
                    tracing::error!(attempts = attempt, error = %err, "Store unavailable, giving up");
                    return Err(ControlError::Unavailable(err.to_string()));
                }
                let delay = policy.delay_after(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "Transient store error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
