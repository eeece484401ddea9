//! In-memory venues for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{OrderSide, Side, SnapshotPosition, VenuePosition, WalletSnapshot};

use super::lighter_client::normalize_symbol;
use super::paper::PaperLedger;
use super::venue::{
    BookTop, ExecutionVenue, MarketOrder, OrderAck, SnapshotSource, VenueError,
};

fn unavailable() -> VenueError {
    VenueError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[derive(Default)]
struct FakeVenueState {
    balance: Decimal,
    balance_failures: u32,
    balance_calls: u32,
    books: HashMap<String, BookTop>,
    ledger: PaperLedger,
    order_failures: u32,
    reject_orders: bool,
    orders: Vec<MarketOrder>,
}

/// Scriptable mirror venue that fills orders at the book mid.
#[derive(Default)]
pub struct FakeVenue {
    state: Mutex<FakeVenueState>,
}

impl FakeVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, balance: Decimal) -> Self {
        self.state.lock().unwrap().balance = balance;
        self
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.with_book(symbol, price, price)
    }

    pub fn with_book(self, symbol: &str, bid: Decimal, ask: Decimal) -> Self {
        self.state.lock().unwrap().books.insert(
            normalize_symbol(symbol),
            BookTop {
                bid: Some(bid),
                ask: Some(ask),
            },
        );
        self
    }

    pub fn with_position(
        self,
        symbol: &str,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Self {
        self.state.lock().unwrap().ledger.insert(VenuePosition {
            market_index: 0,
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            position_value: size * entry_price,
            unrealized_pnl,
        });
        self
    }

    /// Move the book to a single price after construction.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().unwrap().books.insert(
            normalize_symbol(symbol),
            BookTop {
                bid: Some(price),
                ask: Some(price),
            },
        );
    }

    /// Fail the next `n` balance queries with a retryable error.
    pub fn fail_balance(&self, n: u32) {
        self.state.lock().unwrap().balance_failures = n;
    }

    /// Fail the next `n` orders with a retryable error.
    pub fn fail_orders(&self, n: u32) {
        self.state.lock().unwrap().order_failures = n;
    }

    /// Reject every order permanently.
    pub fn reject_orders(&self) {
        self.state.lock().unwrap().reject_orders = true;
    }

    pub fn balance_calls(&self) -> u32 {
        self.state.lock().unwrap().balance_calls
    }

    /// Every order submission, including failed ones.
    pub fn orders(&self) -> Vec<MarketOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn open_positions(&self) -> Vec<VenuePosition> {
        self.state.lock().unwrap().ledger.positions()
    }
}

#[async_trait]
impl ExecutionVenue for FakeVenue {
    async fn available_balance(&self) -> Result<Decimal, VenueError> {
        let mut state = self.state.lock().unwrap();
        state.balance_calls += 1;
        if state.balance_failures > 0 {
            state.balance_failures -= 1;
            return Err(unavailable());
        }
        Ok(state.balance)
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        Ok(self.state.lock().unwrap().ledger.positions())
    }

    async fn book_top(&self, symbol: &str) -> Result<BookTop, VenueError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .books
            .get(&normalize_symbol(symbol))
            .copied()
            .unwrap_or_default())
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError> {
        let mut state = self.state.lock().unwrap();
        state.orders.push(order.clone());

        if state.order_failures > 0 {
            state.order_failures -= 1;
            return Err(unavailable());
        }
        if state.reject_orders {
            return Err(VenueError::Rejected("insufficient margin".to_string()));
        }

        let price = state
            .books
            .get(&normalize_symbol(&order.symbol))
            .and_then(BookTop::mid)
            .unwrap_or(order.limit_price);
        state
            .ledger
            .apply_fill(&order.symbol, order.side, order.size, price, order.reduce_only);

        Ok(OrderAck {
            tx_ref: Some(format!("0xfake{}", order.client_order_index)),
        })
    }
}

/// Scripted snapshot source: each fetch pops the wallet's next entry and the
/// last entry repeats once the script runs out. `None` entries fail.
#[derive(Default)]
pub struct FakeSnapshots {
    scripts: Mutex<HashMap<String, VecDeque<Option<Vec<(&'static str, Decimal)>>>>>,
}

impl FakeSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, address: &str, steps: Vec<Option<Vec<(&'static str, Decimal)>>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.to_lowercase(), steps.into());
    }
}

/// Build a snapshot with 10k equity and positions priced at 100.
pub fn snapshot(address: &str, positions: &[(&str, Decimal)]) -> WalletSnapshot {
    let positions = positions
        .iter()
        .map(|(symbol, size)| SnapshotPosition {
            symbol: symbol.to_string(),
            size: *size,
            entry_price: Decimal::from(100),
            position_value: size.abs() * Decimal::from(100),
            unrealized_pnl: Decimal::ZERO,
            raw: None,
        })
        .collect();
    WalletSnapshot::new(address, Decimal::from(10_000), Decimal::from(10_000), positions)
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch_snapshot(&self, address: &str) -> Result<WalletSnapshot, VenueError> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(&address.to_lowercase())
            .ok_or_else(|| VenueError::Malformed(format!("no script for {}", address)))?;

        let step = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().cloned().flatten()
        };

        match step {
            Some(positions) => Ok(snapshot(address, &positions)),
            None => Err(unavailable()),
        }
    }
}

/// Buy/sell direction of every recorded order.
pub fn order_sides(venue: &FakeVenue) -> Vec<OrderSide> {
    venue.orders().iter().map(|o| o.side).collect()
}
