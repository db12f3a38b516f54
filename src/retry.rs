//! Bounded retry with an explicit backoff schedule.
//!
//! API clients pair this with [RateLimiter::wait](crate::limiter::RateLimiter::wait):
//! the wrapped operation first waits for admission, then performs the real
//! call, and transient failures are retried on the schedule.

use crate::clock::Clock;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Backoff schedule used by callers that have no specific requirements.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation's own error, untransformed: either the predicate
    /// declined to retry it, or the schedule was exhausted.
    #[error(transparent)]
    Operation(E),
    /// The caller canceled during a backoff sleep.
    #[error("retry canceled")]
    Canceled,
}

impl<E> RetryError<E> {
    /// The operation error, if that is what stopped the retries.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Canceled => None,
        }
    }
}

/// Run `operation` up to `backoff.len() + 1` times, retrying every error.
///
/// An empty schedule means exactly one attempt.
pub async fn retry<T, E, F, Fut>(
    clock: &dyn Clock,
    cancel: &CancellationToken,
    backoff: &[Duration],
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(clock, cancel, backoff, |_| true, operation).await
}

/// Run `operation` up to `backoff.len() + 1` times, consulting `should_retry`
/// after each failure.
///
/// A `false` verdict stops immediately, with no sleep and no further
/// attempts, and returns that error. Sleeps between attempts race `cancel`;
/// cancellation wins without starting another attempt.
pub async fn retry_if<T, E, P, F, Fut>(
    clock: &dyn Clock,
    cancel: &CancellationToken,
    backoff: &[Duration],
    should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) || attempt >= backoff.len() {
                    return Err(RetryError::Operation(err));
                }
                let delay = backoff[attempt];
                attempt += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Canceled),
                    _ = clock.sleep(delay) => {}
                }
            }
        }
    }
}
