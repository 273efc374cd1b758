//! Bounded retry with exponential backoff
//!
//! The delay source is injected through `Sleeper` so tests run the loop
//! without real waiting.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::cancel::CancellationToken;

/// Source of delays between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn backoff_for(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Permanent(E),

    #[error("cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `op` receives the 1-based attempt number. Errors for which `is_transient`
/// returns false are surfaced immediately. Cancellation is checked before
/// every attempt and before every delay.
pub fn retry<T, E, F, P>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    is_transient: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        if !is_transient(&err) {
            return Err(RetryError::Permanent(err));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.backoff_for(attempt);
        warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, retrying");
        sleeper.sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient={}", self.transient)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2,
        }
    }

    #[test]
    fn test_backoff_curve_is_capped() {
        let p = policy(5);
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(300));
        assert_eq!(p.backoff_for(40), Duration::from_millis(300));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let result: Result<u32, RetryError<TestError>> = retry(
            &policy(3),
            &sleeper,
            &CancellationToken::new(),
            |e: &TestError| e.transient,
            |attempt| {
                if attempt < 3 {
                    Err(TestError { transient: true })
                } else {
                    Ok(attempt)
                }
            },
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_exhausted_keeps_last_error() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), _> = retry(
            &policy(3),
            &sleeper,
            &CancellationToken::new(),
            |e: &TestError| e.transient,
            |_| {
                calls += 1;
                Err(TestError { transient: true })
            },
        );

        assert_eq!(calls, 3);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.transient);
            }
            other => panic!("expected exhaustion, got {:?}", other.err()),
        }
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), _> = retry(
            &policy(5),
            &sleeper,
            &CancellationToken::new(),
            |e: &TestError| e.transient,
            |_| {
                calls += 1;
                Err(TestError { transient: false })
            },
        );

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), RetryError<TestError>> = retry(
            &policy(3),
            &ThreadSleeper,
            &cancel,
            |e: &TestError| e.transient,
            |_| panic!("must not run"),
        );
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
