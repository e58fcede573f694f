//! Retry logic for unreliable external calls
//!
//! Wraps a fallible async operation with bounded exponential backoff.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. Classify the error:
//!    a. Permanent: return immediately
//!    b. Transient: sleep `backoff`, retry
//!    c. Rate-limited: sleep `2 * backoff`, retry
//! 4. Backoff doubles after every failed attempt
//! 5. No sleep after the final attempt; the last error is returned

use std::future::Future;
use std::time::{Duration, Instant};

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, connection reset, 5xx
    Transient,
    /// Authentication failure, not found, undecodable response
    Permanent,
    /// HTTP 429 or equivalent
    RateLimited,
}

/// Errors that can tell the retry loop what to do with them
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Attempt budget and starting backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Retry `operation` according to `policy`
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "metadata lookup")
/// * `policy` - Attempt budget and initial backoff
/// * `operation` - Closure producing one attempt's future
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                let class = err.class();

                if class == ErrorClass::Permanent {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Permanent error, not retrying"
                    );
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Operation failed: retry attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = match class {
                    ErrorClass::RateLimited => backoff.saturating_mul(2),
                    _ => backoff,
                };

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    rate_limited = class == ErrorClass::RateLimited,
                    error = %err,
                    "Operation failed, will retry after backoff"
                );

                tokio::time::sleep(delay).await;

                backoff = backoff.saturating_mul(2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(ErrorClass);

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            self.0
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    fn failing_until(
        attempts: Arc<AtomicU32>,
        succeed_on: u32,
        class: ErrorClass,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, TestError>> {
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= succeed_on {
                std::future::ready(Ok(n))
            } else {
                std::future::ready(Err(TestError(class)))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry(
            "test_op",
            &policy,
            failing_until(attempts.clone(), 1, ErrorClass::Transient),
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success_waits_one_plus_two_seconds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry(
            "test_op",
            &policy,
            failing_until(attempts.clone(), 3, ErrorClass::Transient),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry(
            "test_op",
            &policy,
            failing_until(attempts.clone(), 10, ErrorClass::Permanent),
        )
        .await;

        assert!(matches!(result, Err(TestError(ErrorClass::Permanent))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_doubles_backoff() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry(
            "test_op",
            &policy,
            failing_until(attempts.clone(), 2, ErrorClass::RateLimited),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_without_final_sleep() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry(
            "test_op",
            &policy,
            failing_until(attempts.clone(), 100, ErrorClass::Transient),
        )
        .await;

        assert!(matches!(result, Err(TestError(ErrorClass::Transient))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s + 2s between attempts, nothing after the third
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts, 1);
    }
}
