//! Bounded exponential backoff for database writes.
//!
//! One policy for every write the lead service makes: three attempts,
//! doubling delay, and only for errors [`RepositoryError::is_transient`]
//! considers worth another try.

use std::future::Future;
use std::time::Duration;

use crate::db::RepositoryError;

/// Retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 never waits).
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(attempt - 2))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// # Errors
///
/// Returns the last error from `op`.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_before(attempt + 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient database error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
