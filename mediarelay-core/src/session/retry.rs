//! Bounded retry for session establishment
//!
//! Runs an operation a fixed number of times, letting a classifier decide per
//! failure whether to retry at once, retry after a backoff pause, or give up.
//! The outcome is always an explicit `Result`.

use std::future::Future;
use std::time::Duration;

/// How many attempts to make and how long to pause between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause applied before retrying a `RetryAfterBackoff` failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff: Duration::from_secs(2),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again immediately.
    Retry,
    /// Try again after the policy's backoff.
    RetryAfterBackoff,
    /// Stop retrying and report the error.
    Abort,
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// The classifier refused to retry this error.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryFailure<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Exhausted { attempts, .. } => *attempts,
            RetryFailure::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The error of the final attempt.
    pub fn into_error(self) -> E {
        match self {
            RetryFailure::Exhausted { last, .. } => last,
            RetryFailure::Aborted { error, .. } => error,
        }
    }
}

/// Runs `operation` until it succeeds, the classifier aborts, or the policy's
/// attempts are used up.
///
/// `operation` receives the 1-based attempt number.
///
/// # Errors
///
/// - `RetryFailure::Exhausted` - All attempts failed with retryable errors
/// - `RetryFailure::Aborted` - An attempt failed with a non-retryable error
pub async fn retry_bounded<T, E, Op, Fut, Classify>(
    policy: &RetryPolicy,
    mut operation: Op,
    classify: Classify,
) -> Result<T, RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Classify: Fn(&E) -> RetryDecision,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let decision = classify(&error);
        if decision == RetryDecision::Abort {
            return Err(RetryFailure::Aborted { attempt, error });
        }
        if attempt >= max_attempts {
            return Err(RetryFailure::Exhausted {
                attempts: attempt,
                last: error,
            });
        }
        if decision == RetryDecision::RetryAfterBackoff && !policy.backoff.is_zero() {
            tokio::time::sleep(policy.backoff).await;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Flaky,
        Slow,
        Fatal,
    }

    fn classify(error: &TestError) -> RetryDecision {
        match error {
            TestError::Flaky => RetryDecision::Retry,
            TestError::Slow => RetryDecision::RetryAfterBackoff,
            TestError::Fatal => RetryDecision::Abort,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry_bounded(
            &RetryPolicy::default(),
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(attempt)
                    }
                }
            },
            classify,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_bounded(
            &RetryPolicy::default(),
            |_| {
                calls.set(calls.get() + 1);
                async { Err(TestError::Flaky) }
            },
            classify,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryFailure::Exhausted {
                attempts: 6,
                last: TestError::Flaky
            })
        );
        assert_eq!(calls.get(), 6);
    }

    #[tokio::test]
    async fn test_abort_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_bounded(
            &RetryPolicy::default(),
            |_| {
                calls.set(calls.get() + 1);
                async { Err(TestError::Fatal) }
            },
            classify,
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts(), 1);
        assert_eq!(failure.into_error(), TestError::Fatal);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_applies_only_to_backoff_errors() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        };

        let started = tokio::time::Instant::now();
        let _: Result<(), _> =
            retry_bounded(&policy, |_| async { Err(TestError::Slow) }, classify).await;
        // Two pauses between three attempts, none after the last.
        assert_eq!(started.elapsed(), Duration::from_secs(4));

        let started = tokio::time::Instant::now();
        let _: Result<(), _> =
            retry_bounded(&policy, |_| async { Err(TestError::Flaky) }, classify).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
