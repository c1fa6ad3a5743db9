//! Bounded retry with a fixed delay between attempts.

use crate::core::config::RetrySettings;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt` (1-based). The first attempt is immediate.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 { Duration::ZERO } else { self.delay }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(settings.attempts, Duration::from_millis(settings.delay_ms))
    }
}

/// Final result plus how many attempts it took. On exhaustion `result` holds
/// the last error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
/// The closure receives the 1-based attempt number.
pub fn with_retry<T, E, F>(policy: RetryPolicy, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match operation(attempt) {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) if attempt >= policy.max_attempts => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }
            Err(_) => {
                tracing::info!(
                    "attempt {}/{} failed; retrying in {}ms",
                    attempt,
                    policy.max_attempts,
                    policy.delay.as_millis()
                );
                attempt += 1;
            }
        }
    }
}
