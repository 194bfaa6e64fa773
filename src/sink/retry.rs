//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default number of attempts, first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay after the first failed attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How often to try an operation and how long to wait in between.
///
/// After failed attempt `n` (counted from 0) the policy waits
/// `base_delay * 2^n`, including after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

/// The error from the final attempt, with how many attempts were made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Wait after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let delay = self.delay_for(attempt);
            debug!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}
