//! Cached view of our available balance on the mirror venue.

use std::future::Future;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::VenueError;

#[derive(Debug, Default)]
struct CachedBalance {
    value: Decimal,
    refreshed_at: Option<Instant>,
}

/// Balance reused for `ttl` after each successful refresh.
pub struct BalanceCache {
    ttl: Duration,
    state: Mutex<CachedBalance>,
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CachedBalance::default()),
        }
    }

    /// Current balance, refreshing through `refresh` when stale.
    ///
    /// A failed refresh keeps the last known value (zero before the first success).
    pub async fn get<F, Fut>(&self, refresh: F) -> Decimal
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Decimal, VenueError>>,
    {
        let mut state = self.state.lock().await;

        let fresh = state
            .refreshed_at
            .is_some_and(|at| at.elapsed() < self.ttl);
        if fresh {
            return state.value;
        }

        match refresh().await {
            Ok(value) => {
                debug!(balance = %value, "Balance refreshed");
                state.value = value;
                state.refreshed_at = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, cached = %state.value, "Balance refresh failed, using cached value");
            }
        }

        state.value
    }

    /// Force the next read to refresh.
    pub async fn invalidate(&self) {
        self.state.lock().await.refreshed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use rust_decimal_macros::dec;

    fn unavailable() -> VenueError {
        VenueError::Status {
            status: 503,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_reuses_value_within_ttl() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(dec!(1000))
                })
                .await;
            assert_eq!(value, dec!(1000));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate().await;
        cache.get(|| async { Ok(dec!(900)) }).await;
        assert_eq!(cache.get(|| async { Ok(dec!(1)) }).await, dec!(900));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_value() {
        let cache = BalanceCache::new(Duration::ZERO);

        assert_eq!(cache.get(|| async { Err(unavailable()) }).await, Decimal::ZERO);
        assert_eq!(cache.get(|| async { Ok(dec!(750)) }).await, dec!(750));
        assert_eq!(cache.get(|| async { Err(unavailable()) }).await, dec!(750));
    }
}
