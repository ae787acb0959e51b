//! Retry utilities for browser navigation.
//!
//! Provides exponential backoff for transient session errors such as a
//! navigation that times out or a page script that fails mid-load. Errors
//! that retrying cannot fix (a lost session, an unsupported operation) are
//! propagated immediately.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::SessionError;

/// Returns `true` if `err` represents a transient condition that should be
/// retried after a backoff delay.
///
/// Retriable errors:
/// - [`SessionError::Timeout`]: the page did not settle in time.
/// - [`SessionError::Script`]: the document was replaced while a script ran.
/// - [`SessionError::StaleReference`]: the target context moved under us.
fn is_retriable(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::Timeout { .. } | SessionError::Script(_) | SessionError::StaleReference(_)
    )
}

/// Executes `operation` against `target` with exponential backoff retries on
/// transient errors.
///
/// `operation` receives the target on every attempt, so the returned future
/// may borrow it. On a retriable error the function sleeps for
/// `backoff_base * 2^attempt` and tries again, up to `max_retries`
/// additional attempts after the first try. If all retries are exhausted the
/// last error is returned.
///
/// With `max_retries = 2` the operation is attempted at most 3 times total.
pub(crate) async fn retry_with_backoff<S, T, F>(
    max_retries: u32,
    backoff_base: Duration,
    target: &mut S,
    mut operation: F,
) -> Result<T, SessionError>
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, SessionError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation(target).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_retriable(&err) || attempt >= max_retries {
            return Err(err);
        }

        let delay = backoff_base.saturating_mul(1u32 << attempt.min(31));
        tracing::warn!(
            attempt,
            max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient browser error, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> SessionError {
        SessionError::Timeout {
            what: "navigation".to_owned(),
            waited_ms: 30_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_on_first_try() {
        let mut calls = 0u32;
        let result = retry_with_backoff(3, Duration::from_secs(1), &mut calls, |calls: &mut u32| {
            *calls += 1;
            Box::pin(async { Ok::<u32, SessionError>(42) })
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_timeout_then_succeeds() {
        let mut calls = 0u32;
        let result = retry_with_backoff(3, Duration::from_secs(1), &mut calls, |calls: &mut u32| {
            *calls += 1;
            let n = *calls;
            Box::pin(async move {
                if n < 3 {
                    Err(timeout())
                } else {
                    Ok::<u32, SessionError>(99)
                }
            })
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_last_error_after_exhausting_retries() {
        let mut calls = 0u32;
        let result =
            retry_with_backoff(2, Duration::from_millis(500), &mut calls, |calls: &mut u32| {
                *calls += 1;
                Box::pin(async {
                    Err::<u32, SessionError>(SessionError::Script("navigation aborted".into()))
                })
            })
            .await;
        // max_retries=2 → 3 total attempts
        assert_eq!(calls, 3);
        assert!(matches!(result, Err(SessionError::Script(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_fatal_error() {
        let mut calls = 0u32;
        let result = retry_with_backoff(3, Duration::from_secs(1), &mut calls, |calls: &mut u32| {
            *calls += 1;
            Box::pin(async { Err::<u32, SessionError>(SessionError::Fatal("websocket closed".into())) })
        })
        .await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(SessionError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let start = tokio::time::Instant::now();
        let mut unit = ();
        let _ = retry_with_backoff(2, Duration::from_secs(1), &mut unit, |_: &mut ()| {
            Box::pin(async { Err::<(), SessionError>(timeout()) })
        })
        .await;
        // 1s + 2s of backoff before the third attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
