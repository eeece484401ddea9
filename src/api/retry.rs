//! Bounded retry with a fixed delay for remote venue calls.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::warn;

use super::venue::VenueError;

/// How often and how patiently a remote call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> FixedAttempts {
        FixedAttempts {
            delay: self.delay,
            retries: self.max_attempts.saturating_sub(1),
            remaining: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Constant delay, giving up after a fixed number of retries.
#[derive(Debug, Clone)]
struct FixedAttempts {
    delay: Duration,
    retries: u32,
    remaining: u32,
}

impl Backoff for FixedAttempts {
    fn reset(&mut self) {
        self.remaining = self.retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    backoff::future::retry_notify(
        policy.backoff(),
        || {
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |e: VenueError, delay: Duration| {
            warn!(
                operation = operation,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Venue call failed, retrying"
            );
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    fn transient() -> VenueError {
        VenueError::Status {
            status: 503,
            body: "busy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let attempts = AtomicU32::new(0);

        let result = with_retry(&fast(5), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast(5), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(matches!(result, Err(VenueError::Status { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast(5), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::UnknownSymbol("DOGE".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(VenueError::UnknownSymbol(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fixed_attempts_reset() {
        let mut backoff = fast(3).backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert!(backoff.next_backoff().is_some());
    }
}
