//! Orders on the mirror venue and the history of executed follows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::event::{EventKind, Side};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Order that opens or adds to a position on `side`.
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order that reduces a position on `side`.
    pub fn closing(side: Side) -> Self {
        Self::opening(side.opposite())
    }

    /// Position side this order builds.
    pub fn position_side(&self) -> Side {
        match self {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of an order submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,

    /// Client sequence number the order was sent with
    pub order_id: Option<String>,

    /// Venue transaction reference
    pub tx_ref: Option<String>,

    /// Base size submitted, after rounding to the market's precision
    pub size: Option<Decimal>,

    pub error: Option<String>,
}

impl OrderResult {
    pub fn filled(order_id: String, tx_ref: Option<String>, size: Decimal) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            tx_ref,
            size: Some(size),
            error: None,
        }
    }

    /// Size that reached the venue, zero when nothing was submitted.
    pub fn submitted_size(&self) -> Decimal {
        self.size.unwrap_or(Decimal::ZERO)
    }

    /// Success with nothing submitted (e.g., closing a flat symbol).
    pub fn noop() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Executed follow, persisted for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub kind: EventKind,
    pub source_wallet: String,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
