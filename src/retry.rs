//! Retry policy shared by the embedding clients and the classifier.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Delay before the second attempt; doubled for every later one.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Failures that can tell whether another attempt may succeed.
pub trait Transient {
    /// `true` for rate limits, timeouts and other failures worth retrying.
    fn is_transient(&self) -> bool;
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-transient failure stopped the loop early.
    Fatal {
        /// 1-based attempt that failed.
        attempt: usize,
        /// The failure.
        error: E,
    },
    /// Every attempt failed transiently.
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Failure from the last attempt.
        error: E,
    },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Fatal { attempt, error } => {
                write!(f, "attempt {} failed permanently: {}", attempt, error)
            }
            RetryError::Exhausted { attempts, error } => {
                write!(f, "gave up after {} attempts: {}", attempts, error)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Bounded exponential backoff: `base, 2*base, 4*base, ...` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay slept after the `failed`-th failed attempt (1-based).
    pub fn backoff(&self, failed: usize) -> Duration {
        let shift = failed.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1 << shift)
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Transient + fmt::Display,
        F: FnMut(usize) -> Result<T, E>,
    {
        let mut attempt = 1usize;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => {
                    return Err(RetryError::Fatal { attempt, error });
                }
                Err(error) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, ?delay, %error, "transient failure, backing off");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn default_schedule_is_one_then_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let result = policy.run(|attempt| {
            calls += 1;
            if attempt < 3 {
                Err(Flaky(true))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_failure_stops_immediately() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let result: Result<(), _> = policy.run(|_| {
            calls += 1;
            Err(Flaky(false))
        });
        assert!(matches!(result, Err(RetryError::Fatal { attempt: 1, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: Result<(), _> = policy.run(|_| Err(Flaky(true)));
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }
}
