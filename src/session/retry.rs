//! Bounded retry with exponential backoff for store writes.
//!
//! Used only where a silently dropped write would be security-relevant
//! (session invalidation). Retries happen solely on errors the store
//! classifies as retryable; everything else propagates immediately.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreResult;

/// Retry schedule: `max_attempts` tries, base delay doubling each attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based attempt that just failed).
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `operation` under the policy, retrying on retryable store errors.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                log::warn!(
                    "{operation_name} failed (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    log::error!(
                        "{operation_name} exhausted {} attempts: {err}",
                        policy.max_attempts
                    );
                } else {
                    log::error!("{operation_name} failed with non-retryable error: {err}");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::default(), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry(RetryPolicy::default(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::DeadlineExceeded("still down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry(RetryPolicy::default(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("gone".into())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }
}
