use std::time::Duration;

use futures::TryFuture;
use futures_retry::{ErrorHandler, FutureRetry, RetryPolicy};
use tracing::warn;

use crate::error::{Error, Result};

pub(crate) struct FixedCountWithDelayStrategy {
    operation: &'static str,
    max_attempts: usize,
    delay: Duration,
}

impl FixedCountWithDelayStrategy {
    pub(crate) fn new(operation: &'static str, max_attempts: usize, delay: Duration) -> Self {
        Self {
            operation,
            max_attempts,
            delay,
        }
    }
}

impl ErrorHandler<Error> for FixedCountWithDelayStrategy {
    type OutError = Error;

    fn handle(&mut self, attempt: usize, e: Error) -> RetryPolicy<Error> {
        if attempt >= self.max_attempts || !e.is_retryable() {
            return RetryPolicy::ForwardError(e);
        }

        warn!(
            operation = self.operation,
            attempt,
            max_attempts = self.max_attempts,
            error = %e,
            "Store operation failed, retrying"
        );
        RetryPolicy::WaitRetry(self.delay)
    }
}

/// Runs the future produced by `factory` until it succeeds, fails with a non-retryable error,
/// or `max_attempts` attempts have been made.
pub(crate) async fn retry_with_fixed_delay<F, Fut, T>(
    operation: &'static str,
    max_attempts: usize,
    delay: Duration,
    factory: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Unpin,
    Fut: TryFuture<Ok = T, Error = Error>,
{
    FutureRetry::new(
        factory,
        FixedCountWithDelayStrategy::new(operation, max_attempts, delay),
    )
    .await
    .map(|(value, _attempts)| value)
    .map_err(|(e, _attempts)| e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_fixed_delay("create store", 5, Duration::from_secs(1), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(Error::StoreUnavailable("warming up".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> =
            retry_with_fixed_delay("create store", 3, Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::StoreUnavailable("down".into())) }
            })
            .await;

        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_fatal_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> =
            retry_with_fixed_delay("create store", 5, Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::StoreNotFound("leases".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
