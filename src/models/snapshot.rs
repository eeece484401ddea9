//! Point-in-time wallet state captured from the tracked venue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One open position inside a wallet snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPosition {
    /// Traded symbol (e.g., "ETH")
    pub symbol: String,

    /// Signed size: positive is long, negative is short
    pub size: Decimal,

    /// Average entry price
    pub entry_price: Decimal,

    /// Notional value of the position in USD
    #[serde(default)]
    pub position_value: Decimal,

    /// Unrealized P&L in USD
    #[serde(default)]
    pub unrealized_pnl: Decimal,

    /// Venue payload this position was parsed from
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

/// Snapshot of a source wallet. Superseded, never mutated, by the next poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Wallet address, lower-case
    pub address: String,

    /// Total account equity in USD
    pub account_value: Decimal,

    /// Equity not committed as margin
    pub available_balance: Decimal,

    /// Positions keyed by symbol
    pub positions: HashMap<String, SnapshotPosition>,

    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl WalletSnapshot {
    /// Create a snapshot, normalizing the address and dropping flat positions.
    pub fn new(
        address: &str,
        account_value: Decimal,
        available_balance: Decimal,
        positions: Vec<SnapshotPosition>,
    ) -> Self {
        let positions = positions
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| (p.symbol.clone(), p))
            .collect();

        Self {
            address: address.to_lowercase(),
            account_value,
            available_balance,
            positions,
            captured_at: Utc::now(),
        }
    }

    /// Signed size held in a symbol, zero when flat.
    pub fn size_of(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of position notionals.
    pub fn total_position_value(&self) -> Decimal {
        self.positions.values().map(|p| p.position_value).sum()
    }

    /// Position value as a fraction of account equity.
    pub fn position_ratio(&self) -> Decimal {
        if self.account_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.total_position_value() / self.account_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, size: Decimal, value: Decimal) -> SnapshotPosition {
        SnapshotPosition {
            symbol: symbol.to_string(),
            size,
            entry_price: dec!(100),
            position_value: value,
            unrealized_pnl: Decimal::ZERO,
            raw: None,
        }
    }

    #[test]
    fn test_snapshot_normalizes_address_and_drops_flat() {
        let snapshot = WalletSnapshot::new(
            "0xABCdef",
            dec!(1000),
            dec!(800),
            vec![position("ETH", dec!(1.5), dec!(150)), position("BTC", dec!(0), dec!(0))],
        );

        assert_eq!(snapshot.address, "0xabcdef");
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.size_of("ETH"), dec!(1.5));
        assert_eq!(snapshot.size_of("BTC"), Decimal::ZERO);
    }

    #[test]
    fn test_position_ratio() {
        let snapshot = WalletSnapshot::new(
            "0x1",
            dec!(1000),
            dec!(500),
            vec![position("ETH", dec!(1), dec!(150)), position("SOL", dec!(-10), dec!(100))],
        );
        assert_eq!(snapshot.position_ratio(), dec!(0.25));

        let empty = WalletSnapshot::new("0x1", Decimal::ZERO, Decimal::ZERO, vec![]);
        assert_eq!(empty.position_ratio(), Decimal::ZERO);
    }
}
