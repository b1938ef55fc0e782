//! The retry loop.

use crate::error::{AttemptFailure, RetryError, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One failed attempt, handed to observers before the backoff sleep.
#[derive(Debug)]
pub struct RetryAttempt<E> {
    /// 1-based number of the attempt that failed.
    pub attempt_number: u32,
    /// Why it failed.
    pub last_error: AttemptFailure<E>,
    /// How long the policy waits before the next attempt.
    pub next_delay: Duration,
}

/// Retry configuration for a single kind of remote call.
///
/// Delay before the attempt following failed attempt `n` (1-based) is
/// `min(backoff_base * 2^(n-1), backoff_cap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Deadline for each individual attempt.
    pub timeout: Duration,
    /// Delay after the first failed attempt.
    pub backoff_base: Duration,
    /// Upper bound for any single delay.
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with default backoff.
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            ..Self::default()
        }
    }

    /// Policy that waits the same `delay` between every attempt.
    pub fn fixed(max_attempts: u32, timeout: Duration, delay: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            backoff_base: delay,
            backoff_cap: delay,
        }
    }

    /// Single attempt bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, timeout)
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }

    /// Run `op`, retrying errors that report [`Retryable::is_retryable`].
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(operation, op, |e: &E| e.is_retryable(), |_| {})
            .await
    }

    /// Run `op` with an explicit retry classifier.
    pub async fn run_classified<T, E, F, Fut, C>(
        &self,
        operation: &str,
        op: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        self.execute(operation, op, classify, |_| {}).await
    }

    /// Run `op`, reporting every failed attempt to `observer`.
    pub async fn run_observed<T, E, F, Fut, O>(
        &self,
        operation: &str,
        op: F,
        observer: O,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(&RetryAttempt<E>),
    {
        self.execute(operation, op, |e: &E| e.is_retryable(), observer)
            .await
    }

    async fn execute<T, E, F, Fut, C, O>(
        &self,
        operation: &str,
        mut op: F,
        classify: C,
        mut observer: O,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        O: FnMut(&RetryAttempt<E>),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            // A timed-out attempt's future is dropped here, so its late
            // result can never be observed.
            let failure = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) if !classify(&error) => {
                    debug!(operation, attempt, error = %error, "Non-retryable failure");
                    return Err(RetryError::Rejected {
                        operation: operation.to_string(),
                        error,
                    });
                }
                Ok(Err(error)) => AttemptFailure::Failed(error),
                Err(_) => AttemptFailure::Timeout(self.timeout),
            };

            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: failure,
                });
            }

            let record = RetryAttempt {
                attempt_number: attempt,
                next_delay: self.delay_for_attempt(attempt),
                last_error: failure,
            };
            debug!(
                operation,
                attempt,
                max_attempts,
                delay_ms = record.next_delay.as_millis() as u64,
                error = %record.last_error,
                "Attempt failed, retrying"
            );
            observer(&record);
            tokio::time::sleep(record.next_delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(5))
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.backoff_base, Duration::from_millis(500));
        assert_eq!(policy.backoff_cap, Duration::from_secs(5));
    }

    #[test]
    fn test_delay_exponential_backoff_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(5000));
    }

    #[test]
    fn test_fixed_policy_has_constant_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("lookup", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TestError>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("lookup", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("lookup", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts(), Some(2));
        assert!(!err.timed_out());
        assert_eq!(err.last_error(), Some(&TestError::Transient));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("lookup", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            RetryError::Rejected {
                error: TestError::Fatal,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(200));
        let result: Result<(), RetryError<TestError>> = policy
            .run("slow", || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending()
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.timed_out());
        assert_eq!(err.attempts(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_failed_attempt_with_backoff() {
        let mut seen = Vec::new();
        let result: Result<(), _> = fast_policy(4)
            .run_observed(
                "lookup",
                || async { Err(TestError::Transient) },
                |attempt: &RetryAttempt<TestError>| {
                    seen.push((attempt.attempt_number, attempt.next_delay));
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            seen,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(350)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = fast_policy(3)
            .run("lookup", || async { Err(TestError::Transient) })
            .await;
        // 100ms + 200ms of backoff, no sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_classified_overrides_trait() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run_classified(
                "insert",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Fatal) }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = fast_policy(0)
            .run("lookup", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
