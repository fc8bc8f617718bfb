//! Failure envelope for external calls.
//!
//! Every model backend and every source connector goes through [`guarded`]:
//! bounded retry with exponential backoff around a circuit breaker around a
//! per-call timeout. The shared pieces (breakers, caches, limiters) are plain
//! values constructed at the entry point and handed down through `AppState`.

pub mod cache;
pub mod circuit;
pub mod rate_limit;

use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use cache::TtlCache;
pub use circuit::{BreakerOptions, CircuitBreaker, CircuitState};
pub use rate_limit::{RateDecision, RateLimiter};

use crate::types::ResilienceConfig;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Backoff before attempt `attempt + 1`: doubles from the initial delay,
    /// capped, plus up to 150ms of jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(self.max_backoff_ms);
        let jitter = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0))
            % 150;
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Inner(E),
}

impl<E: Retryable> Retryable for GuardError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            GuardError::CircuitOpen(_) => false,
            GuardError::TimedOut(_) => true,
            GuardError::Inner(err) => err.is_retryable(),
        }
    }
}

/// `retry(policy, breaker(timeout(op)))`.
///
/// The breaker is consulted before every attempt, so an open circuit fails
/// fast without calling `op`. Timeouts and inner errors both count as breaker
/// failures; only retryable outcomes are attempted again.
pub async fn guarded<T, E, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    key: &str,
    timeout: Duration,
    mut op: F,
) -> Result<T, GuardError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match through_breaker(breaker, key, timeout, &mut op).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_retryable() && attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    log::warn!(
                        "{} retry {}/{} after error: {} (sleep {:?})",
                        key,
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

async fn through_breaker<T, E, F, Fut>(
    breaker: &CircuitBreaker,
    key: &str,
    timeout: Duration,
    op: &mut F,
) -> Result<T, GuardError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if !breaker.try_acquire(key) {
        return Err(GuardError::CircuitOpen(key.to_string()));
    }

    match tokio::time::timeout(timeout, op()).await {
        Ok(Ok(value)) => {
            breaker.record_success(key);
            Ok(value)
        }
        Ok(Err(err)) => {
            breaker.record_failure(key);
            Err(GuardError::Inner(err))
        }
        Err(_) => {
            breaker.record_failure(key);
            Err(GuardError::TimedOut(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerOptions {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(60),
                half_open_successes: 1,
            },
        )
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
        };
        let first = policy.delay_for(1).as_millis();
        let second = policy.delay_for(2).as_millis();
        let fourth = policy.delay_for(4).as_millis();
        assert!((100..250).contains(&first));
        assert!((200..350).contains(&second));
        assert!((300..450).contains(&fourth));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(10);
        let result: Result<&str, GuardError<TestError>> =
            guarded(&fast_policy(), &breaker, "flaky", Duration::from_secs(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError { retryable: true })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(10);
        let result: Result<(), GuardError<TestError>> =
            guarded(&fast_policy(), &breaker, "bad-request", Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { retryable: false }) }
            })
            .await;
        assert!(matches!(result, Err(GuardError::Inner(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = breaker(1);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..fast_policy()
        };
        let result: Result<(), GuardError<TestError>> =
            guarded(&policy, &breaker, "slow", Duration::from_millis(5), || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GuardError::TimedOut(_))));
        assert_eq!(breaker.state("slow"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(2);
        breaker.record_failure("down");
        breaker.record_failure("down");

        let result: Result<(), GuardError<TestError>> =
            guarded(&fast_policy(), &breaker, "down", Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(GuardError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
