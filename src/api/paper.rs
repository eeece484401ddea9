//! Paper trading venue for dry runs.
//!
//! Quotes come from the live order book; fills happen at the mid price against
//! an in-memory ledger, and open positions are marked to the same mid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{OrderSide, Side, VenuePosition};

use super::lighter_client::{market_for_symbol, normalize_symbol};
use super::venue::{BookTop, ExecutionVenue, MarketOrder, OrderAck, VenueError};

fn direction(side: Side) -> Decimal {
    match side {
        Side::Long => Decimal::ONE,
        Side::Short => Decimal::NEGATIVE_ONE,
    }
}

/// Revalue unrealized P&L at `mark`. Position value stays at cost.
fn mark_to(position: &mut VenuePosition, mark: Decimal) {
    position.unrealized_pnl =
        (mark - position.entry_price) * position.size * direction(position.side);
}

/// Simulated account: cash plus positions at their entry prices.
#[derive(Debug, Clone, Default)]
pub struct PaperLedger {
    cash: Decimal,
    positions: HashMap<String, VenuePosition>,
}

impl PaperLedger {
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            positions: HashMap::new(),
        }
    }

    /// Cash not tied up in open positions.
    pub fn available(&self) -> Decimal {
        let committed: Decimal = self
            .positions
            .values()
            .map(|p| p.size * p.entry_price)
            .sum();
        self.cash - committed
    }

    pub fn positions(&self) -> Vec<VenuePosition> {
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Insert or replace a position directly.
    pub fn insert(&mut self, position: VenuePosition) {
        self.positions
            .insert(normalize_symbol(&position.symbol), position);
    }

    /// Apply a fill and return the size actually filled.
    ///
    /// Opposite-side fills reduce first; any remainder opens the other side
    /// unless the order is reduce-only.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        reduce_only: bool,
    ) -> Decimal {
        let key = normalize_symbol(symbol);
        let target = side.position_side();
        let mut filled = Decimal::ZERO;
        let mut remaining = size;

        if let Some(existing) = self.positions.get_mut(&key) {
            if existing.side == target {
                if reduce_only {
                    return Decimal::ZERO;
                }
                let new_size = existing.size + size;
                existing.entry_price =
                    (existing.size * existing.entry_price + size * price) / new_size;
                existing.size = new_size;
                existing.position_value = new_size * existing.entry_price;
                return size;
            }

            let closing = remaining.min(existing.size);
            self.cash += (price - existing.entry_price) * closing * direction(existing.side);
            existing.size -= closing;
            existing.position_value = existing.size * existing.entry_price;
            filled += closing;
            remaining -= closing;

            if existing.size.is_zero() {
                self.positions.remove(&key);
            }
        }

        if remaining > Decimal::ZERO && !reduce_only {
            self.positions.insert(
                key.clone(),
                VenuePosition {
                    market_index: market_for_symbol(&key).map(|m| m.index).unwrap_or(0),
                    symbol: key,
                    side: target,
                    size: remaining,
                    entry_price: price,
                    position_value: remaining * price,
                    unrealized_pnl: Decimal::ZERO,
                },
            );
            filled += remaining;
        }

        filled
    }
}

/// Venue that trades against a [`PaperLedger`] using another venue's quotes.
pub struct PaperVenue {
    quotes: Arc<dyn ExecutionVenue>,
    ledger: Mutex<PaperLedger>,
    fills: AtomicU64,
}

impl PaperVenue {
    pub fn new(quotes: Arc<dyn ExecutionVenue>, starting_cash: Decimal) -> Self {
        Self {
            quotes,
            ledger: Mutex::new(PaperLedger::new(starting_cash)),
            fills: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn available_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.ledger.lock().await.available())
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let mut positions = self.ledger.lock().await.positions();
        for position in &mut positions {
            if let Some(mid) = self.quotes.book_top(&position.symbol).await?.mid() {
                mark_to(position, mid);
            }
        }
        Ok(positions)
    }

    async fn book_top(&self, symbol: &str) -> Result<BookTop, VenueError> {
        self.quotes.book_top(symbol).await
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError> {
        market_for_symbol(&order.symbol)?;

        let mid = self
            .quotes
            .book_top(&order.symbol)
            .await?
            .mid()
            .ok_or_else(|| VenueError::Rejected(format!("no liquidity for {}", order.symbol)))?;

        let beyond_limit = match order.side {
            OrderSide::Buy => mid > order.limit_price,
            OrderSide::Sell => mid < order.limit_price,
        };
        if beyond_limit {
            return Err(VenueError::Rejected(format!(
                "mid {} beyond limit {}",
                mid, order.limit_price
            )));
        }

        let filled = self.ledger.lock().await.apply_fill(
            &order.symbol,
            order.side,
            order.size,
            mid,
            order.reduce_only,
        );
        if filled.is_zero() {
            return Err(VenueError::Rejected(
                "reduce-only order with no position to reduce".to_string(),
            ));
        }

        let n = self.fills.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            symbol = %order.symbol,
            side = %order.side,
            size = %filled,
            price = %mid,
            "[DRY RUN] Paper fill"
        );

        Ok(OrderAck {
            tx_ref: Some(format!("paper-{}", n)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeVenue;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ledger_open_add_reduce() {
        let mut ledger = PaperLedger::new(dec!(10000));

        assert_eq!(
            ledger.apply_fill("ETH", OrderSide::Buy, dec!(1), dec!(2000), false),
            dec!(1)
        );
        ledger.apply_fill("ETH", OrderSide::Buy, dec!(1), dec!(3000), false);
        let positions = ledger.positions();
        let eth = &positions[0];
        assert_eq!(eth.size, dec!(2));
        assert_eq!(eth.entry_price, dec!(2500));
        assert_eq!(ledger.available(), dec!(5000));

        ledger.apply_fill("ETH", OrderSide::Sell, dec!(2), dec!(3000), true);
        assert!(ledger.positions().is_empty());
        assert_eq!(ledger.available(), dec!(11000));
    }

    #[test]
    fn test_ledger_reduce_only_never_flips() {
        let mut ledger = PaperLedger::new(dec!(10000));
        ledger.apply_fill("BTC", OrderSide::Sell, dec!(0.1), dec!(60000), false);

        let filled = ledger.apply_fill("BTC", OrderSide::Buy, dec!(0.5), dec!(60000), true);
        assert_eq!(filled, dec!(0.1));
        assert!(ledger.positions().is_empty());

        assert_eq!(
            ledger.apply_fill("BTC", OrderSide::Buy, dec!(0.5), dec!(60000), true),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_paper_venue_fills_at_mid() {
        let quotes = Arc::new(FakeVenue::new().with_book("ETH", dec!(2990), dec!(3010)));
        let venue = PaperVenue::new(quotes, dec!(10000));

        let ack = venue
            .submit_market_order(&MarketOrder {
                symbol: "ETH".to_string(),
                side: OrderSide::Buy,
                size: dec!(1),
                limit_price: dec!(3030),
                reduce_only: false,
                client_order_index: 1,
            })
            .await
            .unwrap();
        assert_eq!(ack.tx_ref.as_deref(), Some("paper-1"));

        let positions = venue.positions().await.unwrap();
        assert_eq!(positions[0].side, Side::Long);
        assert_eq!(positions[0].entry_price, dec!(3000));
        assert_eq!(venue.available_balance().await.unwrap(), dec!(7000));
    }

    #[tokio::test]
    async fn test_paper_positions_marked_to_mid() {
        let quotes = Arc::new(FakeVenue::new().with_price("ETH", dec!(2500)));
        let venue = PaperVenue::new(quotes.clone(), dec!(10000));

        venue
            .submit_market_order(&MarketOrder {
                symbol: "ETH".to_string(),
                side: OrderSide::Buy,
                size: dec!(1),
                limit_price: dec!(2525),
                reduce_only: false,
                client_order_index: 1,
            })
            .await
            .unwrap();

        quotes.set_price("ETH", dec!(1000));
        let positions = venue.positions().await.unwrap();
        assert_eq!(positions[0].unrealized_pnl, dec!(-1500));
        assert_eq!(positions[0].position_value, dec!(2500));
        assert_eq!(positions[0].loss_ratio(), dec!(-0.6));
    }

    #[test]
    fn test_short_mark() {
        let mut ledger = PaperLedger::new(dec!(10000));
        ledger.apply_fill("SOL", OrderSide::Sell, dec!(10), dec!(150), false);

        let mut sol = ledger.positions().remove(0);
        mark_to(&mut sol, dec!(120));
        assert_eq!(sol.unrealized_pnl, dec!(300));
    }

    #[tokio::test]
    async fn test_paper_venue_respects_limit() {
        let quotes = Arc::new(FakeVenue::new().with_book("ETH", dec!(2990), dec!(3010)));
        let venue = PaperVenue::new(quotes, dec!(10000));

        let result = venue
            .submit_market_order(&MarketOrder {
                symbol: "ETH".to_string(),
                side: OrderSide::Sell,
                size: dec!(1),
                limit_price: dec!(3100),
                reduce_only: false,
                client_order_index: 1,
            })
            .await;
        assert!(matches!(result, Err(VenueError::Rejected(_))));
    }
}
