//! Venue boundaries: where snapshots come from and where follow orders go.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{OrderSide, VenuePosition, WalletSnapshot};

/// Errors raised by venue clients.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Venue returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl VenueError {
    /// Whether repeating the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            VenueError::Http(_) => true,
            VenueError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Best bid and ask of an order book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookTop {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

impl BookTop {
    /// Mid price, or whichever side exists.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }
}

/// A market order with its slippage limit already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,

    /// Worst acceptable fill price
    pub limit_price: Decimal,

    pub reduce_only: bool,

    /// Client sequence number
    pub client_order_index: u64,
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderAck {
    pub tx_ref: Option<String>,
}

/// Read side of the tracked venue.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, address: &str) -> Result<WalletSnapshot, VenueError>;
}

/// Our own account on the mirror venue.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Balance available for new positions.
    async fn available_balance(&self) -> Result<Decimal, VenueError>;

    /// Open positions, flat markets excluded.
    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    async fn book_top(&self, symbol: &str) -> Result<BookTop, VenueError>;

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError>;
}
