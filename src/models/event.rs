//! Position-change events derived from consecutive wallet snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    /// Side implied by a signed size, `None` when flat.
    pub fn from_signed(size: Decimal) -> Option<Self> {
        if size > Decimal::ZERO {
            Some(Side::Long)
        } else if size < Decimal::ZERO {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" => Some(Side::Long),
            "SHORT" => Some(Side::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of position transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Open,
    Close,
    Increase,
    Decrease,
    Flip,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "OPEN",
            EventKind::Close => "CLOSE",
            EventKind::Increase => "INCREASE",
            EventKind::Decrease => "DECREASE",
            EventKind::Flip => "FLIP",
            EventKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A symbol transition for one wallet between two snapshots.
///
/// Transient: consumed once by the follow engine and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub kind: EventKind,
    pub symbol: String,

    /// Side after the change (inherited from the old side on close)
    pub side: Side,

    /// Absolute size after the change
    pub size: Decimal,

    /// Absolute size before the change
    pub previous_size: Decimal,

    /// Entry price after the change, zero when closed
    pub price: Decimal,

    pub wallet_address: String,

    /// Source wallet's position value / equity at the new snapshot
    pub source_position_ratio: Decimal,

    pub timestamp: DateTime<Utc>,

    /// Venue payload for diagnostics
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

impl std::fmt::Display for PositionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} | size: {} | price: {}",
            self.kind, self.symbol, self.side, self.size, self.price
        )
    }
}
