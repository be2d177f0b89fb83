//! Blocking retry helper for payloads running on worker threads

use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Failure of the final attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    pub attempts: usize,
    pub last_error: E,
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached
///
/// The closure receives the 1-based attempt number. Sleeps block the calling
/// thread, so only call this from a worker.
pub fn retry_blocking<T, E, F>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Result<T, E>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Attempt {}/{}", attempt, max_attempts);

        match operation(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(error) if attempt >= max_attempts => {
                warn!(
                    "Operation failed after {} attempts, last error: {}",
                    attempt, error
                );
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {} failed, retrying in {:?}: {}",
                    attempt, delay, error
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}
