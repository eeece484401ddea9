//! Order execution on the mirror venue with bounded retry.
//!
//! Every remote call goes through the retry envelope. Market orders carry a
//! slippage limit off the book mid and a client sequence number that stays
//! the same across retries of one order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::{
    normalize_symbol, tradable_size, with_retry, ExecutionVenue, MarketOrder, RetryPolicy,
    VenueError,
};
use crate::models::{OrderResult, OrderSide, VenuePosition};

/// Worst acceptable price for a market order.
pub fn slippage_limit(mid: Decimal, side: OrderSide, max_slippage: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => mid * (Decimal::ONE + max_slippage),
        OrderSide::Sell => mid * (Decimal::ONE - max_slippage),
    }
}

/// Executes follow orders against an [`ExecutionVenue`].
pub struct OrderExecutor {
    venue: Arc<dyn ExecutionVenue>,
    retry: RetryPolicy,
    max_slippage: Decimal,
    next_order_index: AtomicU64,
}

impl OrderExecutor {
    pub fn new(venue: Arc<dyn ExecutionVenue>, retry: RetryPolicy, max_slippage: Decimal) -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();

        Self {
            venue,
            retry,
            max_slippage,
            next_order_index: AtomicU64::new(seed),
        }
    }

    fn next_client_order_index(&self) -> u64 {
        self.next_order_index.fetch_add(1, Ordering::SeqCst)
    }

    /// Available balance on the mirror account.
    pub async fn get_balance(&self) -> Result<Decimal, VenueError> {
        with_retry(&self.retry, "get_balance", || self.venue.available_balance()).await
    }

    /// All open positions on the mirror account.
    pub async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        with_retry(&self.retry, "get_positions", || self.venue.positions()).await
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, VenueError> {
        let wanted = normalize_symbol(symbol);
        Ok(self
            .get_positions()
            .await?
            .into_iter()
            .find(|p| normalize_symbol(&p.symbol) == wanted))
    }

    /// Mid price, `None` when the book is empty on both sides.
    pub async fn get_price(&self, symbol: &str) -> Result<Option<Decimal>, VenueError> {
        let top = with_retry(&self.retry, "get_price", || self.venue.book_top(symbol)).await?;
        Ok(top.mid())
    }

    /// Place a market order capped at `max_slippage` (the configured default when `None`).
    ///
    /// `size` is truncated to the market's precision first; the result carries
    /// the size actually submitted.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        reduce_only: bool,
        max_slippage: Option<Decimal>,
    ) -> OrderResult {
        let requested = size;
        let size = tradable_size(symbol, requested);
        if size <= Decimal::ZERO {
            return OrderResult::failed(format!("invalid order size {}", requested));
        }

        let mid = match self.get_price(symbol).await {
            Ok(Some(mid)) => mid,
            Ok(None) => return OrderResult::failed(format!("no price available for {}", symbol)),
            Err(e) => return OrderResult::failed(e.to_string()),
        };

        let order = MarketOrder {
            symbol: symbol.to_string(),
            side,
            size,
            limit_price: slippage_limit(mid, side, max_slippage.unwrap_or(self.max_slippage)),
            reduce_only,
            client_order_index: self.next_client_order_index(),
        };

        info!(
            symbol = %symbol,
            side = %side,
            size = %size,
            limit = %order.limit_price,
            reduce_only = reduce_only,
            "Submitting market order"
        );

        match with_retry(&self.retry, "submit_market_order", || {
            self.venue.submit_market_order(&order)
        })
        .await
        {
            Ok(ack) => {
                info!(
                    symbol = %symbol,
                    order_id = order.client_order_index,
                    tx = ?ack.tx_ref,
                    "Order accepted"
                );
                OrderResult::filled(order.client_order_index.to_string(), ack.tx_ref, order.size)
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Order failed");
                OrderResult::failed(e.to_string())
            }
        }
    }

    /// Close our whole position in `symbol`. Flat is success with nothing sent.
    pub async fn close_position(&self, symbol: &str) -> OrderResult {
        match self.get_position(symbol).await {
            Ok(Some(position)) => self.close_venue_position(&position).await,
            Ok(None) => {
                info!(symbol = %symbol, "No position to close");
                OrderResult::noop()
            }
            Err(e) => OrderResult::failed(e.to_string()),
        }
    }

    /// Reduce-only order for the full size of `position`.
    pub async fn close_venue_position(&self, position: &VenuePosition) -> OrderResult {
        self.place_market_order(
            &position.symbol,
            OrderSide::closing(position.side),
            position.size,
            true,
            None,
        )
        .await
    }

    /// Close every open position, one order per symbol.
    pub async fn close_all_positions(&self) -> Result<BTreeMap<String, OrderResult>, VenueError> {
        let positions = self.get_positions().await?;
        let mut results = BTreeMap::new();

        for position in positions {
            let result = self.close_venue_position(&position).await;
            if !result.success {
                warn!(symbol = %position.symbol, error = ?result.error, "Close failed");
            }
            results.insert(position.symbol.clone(), result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{order_sides, FakeVenue};
    use crate::models::Side;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::ZERO,
        }
    }

    fn executor(venue: Arc<FakeVenue>) -> OrderExecutor {
        OrderExecutor::new(venue, fast_retry(), dec!(0.01))
    }

    #[test]
    fn test_slippage_direction() {
        assert_eq!(slippage_limit(dec!(100), OrderSide::Buy, dec!(0.01)), dec!(101));
        assert_eq!(slippage_limit(dec!(100), OrderSide::Sell, dec!(0.01)), dec!(99));
    }

    #[tokio::test]
    async fn test_order_carries_limit_and_increasing_sequence() {
        let venue = Arc::new(FakeVenue::new().with_book("ETH", dec!(2990), dec!(3010)));
        let exec = executor(venue.clone());

        let first = exec
            .place_market_order("ETH", OrderSide::Buy, dec!(0.5), false, None)
            .await;
        let second = exec
            .place_market_order("ETH", OrderSide::Sell, dec!(0.5), true, Some(dec!(0.02)))
            .await;
        assert!(first.success && second.success);

        let orders = venue.orders();
        assert_eq!(orders[0].limit_price, dec!(3030));
        assert_eq!(orders[1].limit_price, dec!(2940));
        assert!(orders[1].client_order_index > orders[0].client_order_index);
        assert_eq!(
            first.order_id,
            Some(orders[0].client_order_index.to_string())
        );
    }

    #[tokio::test]
    async fn test_order_size_truncated_to_market_precision() {
        let venue = Arc::new(FakeVenue::new().with_price("ETH", dec!(3000)));
        let exec = executor(venue.clone());

        let result = exec
            .place_market_order("ETH", OrderSide::Buy, dec!(0.16666666), false, None)
            .await;
        assert!(result.success);
        assert_eq!(result.size, Some(dec!(0.1666)));
        assert_eq!(venue.orders()[0].size, dec!(0.1666));

        let dust = exec
            .place_market_order("ETH", OrderSide::Buy, dec!(0.00009), false, None)
            .await;
        assert!(!dust.success);
        assert_eq!(venue.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_with_same_sequence() {
        let venue = Arc::new(FakeVenue::new().with_price("BTC", dec!(60000)));
        venue.fail_orders(2);
        let exec = executor(venue.clone());

        let result = exec
            .place_market_order("BTC", OrderSide::Buy, dec!(0.01), false, None)
            .await;
        assert!(result.success);

        let orders = venue.orders();
        assert_eq!(orders.len(), 3);
        assert!(orders.iter().all(|o| o.client_order_index == orders[0].client_order_index));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let venue = Arc::new(FakeVenue::new().with_price("BTC", dec!(60000)));
        venue.reject_orders();
        let exec = executor(venue.clone());

        let result = exec
            .place_market_order("BTC", OrderSide::Buy, dec!(0.01), false, None)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("insufficient margin"));
        assert_eq!(venue.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_order_fails_without_price() {
        let venue = Arc::new(FakeVenue::new());
        let exec = executor(venue.clone());

        let result = exec
            .place_market_order("ETH", OrderSide::Buy, dec!(1), false, None)
            .await;
        assert!(!result.success);
        assert!(venue.orders().is_empty());
    }

    #[tokio::test]
    async fn test_close_flat_symbol_is_noop_success() {
        let venue = Arc::new(FakeVenue::new().with_price("ETH", dec!(3000)));
        let exec = executor(venue.clone());

        let result = exec.close_position("ETH").await;
        assert!(result.success);
        assert!(result.order_id.is_none());
        assert!(venue.orders().is_empty());
    }

    #[tokio::test]
    async fn test_close_position_is_reduce_only_opposite_side() {
        let venue = Arc::new(
            FakeVenue::new()
                .with_price("ETH", dec!(3000))
                .with_position("ETH", Side::Short, dec!(2), dec!(3100), dec!(200)),
        );
        let exec = executor(venue.clone());

        let result = exec.close_position("eth").await;
        assert!(result.success);

        let orders = venue.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].size, dec!(2));
        assert!(orders[0].reduce_only);
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let venue = Arc::new(
            FakeVenue::new()
                .with_price("ETH", dec!(3000))
                .with_price("BTC", dec!(60000))
                .with_position("ETH", Side::Long, dec!(1), dec!(3000), Decimal::ZERO)
                .with_position("BTC", Side::Short, dec!(0.1), dec!(60000), Decimal::ZERO),
        );
        let exec = executor(venue.clone());

        let results = exec.close_all_positions().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.success));
        assert_eq!(order_sides(&venue), vec![OrderSide::Buy, OrderSide::Sell]);
        assert!(venue.open_positions().is_empty());

        let again = exec.close_all_positions().await.unwrap();
        assert!(again.is_empty());
        assert_eq!(venue.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_balance_retries_then_succeeds() {
        let venue = Arc::new(FakeVenue::new().with_balance(dec!(5000)));
        venue.fail_balance(4);
        let exec = executor(venue.clone());

        assert_eq!(exec.get_balance().await.unwrap(), dec!(5000));
        assert_eq!(venue.balance_calls(), 5);

        venue.fail_balance(5);
        assert!(exec.get_balance().await.is_err());
    }
}
