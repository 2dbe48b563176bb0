//! Retry policy for storage operations
//!
//! Busy or locked databases are retried with configurable backoff; the
//! result type carries a retryable flag instead of using errors for control
//! flow.

use std::time::Duration;

use tracing::debug;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// base, 2*base, 4*base, ...
    Exponential,
    /// base, 2*base, 3*base, ...
    Linear,
    /// base every time
    Fixed,
    /// Exponential with deterministic half-step jitter
    Jittered,
}

/// Retry configuration for storage operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_ms: 20,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.strategy {
            BackoffStrategy::Exponential => self.base_ms.saturating_mul(1u64 << attempt.min(16)),
            BackoffStrategy::Linear => self.base_ms.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Fixed => self.base_ms,
            BackoffStrategy::Jittered => {
                let exp = self.base_ms.saturating_mul(1u64 << attempt.min(16));
                // Deterministic jitter: alternate between full and half step
                if attempt % 2 == 0 {
                    exp
                } else {
                    exp / 2 + 1
                }
            }
        };
        Duration::from_millis(ms)
    }

    /// Run an operation, retrying while it reports a retryable failure.
    ///
    /// The closure returns `(result, retryable)`; a retryable error is
    /// attempted up to `max_attempts` times before it is surfaced.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> (Result<T, E>, bool),
    {
        let mut attempt = 0u32;
        loop {
            let (result, retryable) = op();
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !retryable || attempt + 1 >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    debug!("Retryable storage failure, attempt {} sleeping {:?}", attempt, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Whether a rusqlite error is worth retrying.
pub fn is_retryable(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            base_ms: 10,
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            base_ms: 10,
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(30));
    }

    #[test]
    fn test_fixed_delays() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            base_ms: 15,
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(15));
        assert_eq!(policy.delay_for(5), Duration::from_millis(15));
    }

    #[test]
    fn test_run_retries_until_success() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            base_ms: 1,
            max_attempts: 5,
        };

        let mut calls = 0;
        let result: Result<i32, &str> = policy.run(|| {
            calls += 1;
            if calls < 3 {
                (Err("busy"), true)
            } else {
                (Ok(7), false)
            }
        });

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            base_ms: 1,
            max_attempts: 3,
        };

        let mut calls = 0;
        let result: Result<i32, &str> = policy.run(|| {
            calls += 1;
            (Err("busy"), true)
        });

        assert_eq!(result, Err("busy"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_retryable_surfaces_immediately() {
        let policy = RetryPolicy::default();

        let mut calls = 0;
        let result: Result<i32, &str> = policy.run(|| {
            calls += 1;
            (Err("corrupt"), false)
        });

        assert_eq!(result, Err("corrupt"));
        assert_eq!(calls, 1);
    }
}
