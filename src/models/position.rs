//! Positions on the mirror venue and their lock bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::event::Side;

/// Our mirrored position in a symbol and the source wallet holding its lock.
///
/// At most one exists per symbol. A zero size marks a pending claim: the lock
/// is held while an opening order is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredPosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,

    /// Lock holder, lower-case
    pub source_wallet: String,

    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MirroredPosition {
    /// Whether `wallet` holds the lock on this symbol.
    pub fn is_held_by(&self, wallet: &str) -> bool {
        self.source_wallet.eq_ignore_ascii_case(wallet)
    }

    /// Zero-size claim with no fill behind it.
    pub fn is_pending(&self) -> bool {
        self.size.is_zero()
    }

    /// Size and average entry after adding a fill on the same side.
    pub fn after_add(&self, size: Decimal, price: Decimal) -> (Decimal, Decimal) {
        let new_size = self.size + size;
        if new_size.is_zero() {
            return (Decimal::ZERO, price);
        }
        let cost = self.size * self.entry_price + size * price;
        (new_size, cost / new_size)
    }

    /// Size remaining after reducing by `size`, floored at zero.
    pub fn after_reduce(&self, size: Decimal) -> Decimal {
        (self.size - size).max(Decimal::ZERO)
    }
}

/// A position as reported by the mirror venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub market_index: u32,
    pub symbol: String,
    pub side: Side,

    /// Absolute size
    pub size: Decimal,

    pub entry_price: Decimal,
    pub position_value: Decimal,
    pub unrealized_pnl: Decimal,
}

impl VenuePosition {
    /// Unrealized P&L as a fraction of position value.
    pub fn loss_ratio(&self) -> Decimal {
        if self.position_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / self.position_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mirrored(size: Decimal, entry: Decimal) -> MirroredPosition {
        MirroredPosition {
            symbol: "ETH".to_string(),
            side: Side::Long,
            size,
            entry_price: entry,
            source_wallet: "0xabc".to_string(),
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_averages_entry() {
        let pos = mirrored(dec!(1), dec!(2000));
        let (size, entry) = pos.after_add(dec!(1), dec!(3000));
        assert_eq!(size, dec!(2));
        assert_eq!(entry, dec!(2500));
    }

    #[test]
    fn test_add_to_pending_claim_uses_fill_price() {
        let pos = mirrored(Decimal::ZERO, Decimal::ZERO);
        assert!(pos.is_pending());
        let (size, entry) = pos.after_add(dec!(0.5), dec!(3000));
        assert_eq!(size, dec!(0.5));
        assert_eq!(entry, dec!(3000));
    }

    #[test]
    fn test_holder_match_is_case_insensitive() {
        let pos = mirrored(dec!(1), dec!(1));
        assert!(pos.is_held_by("0xABC"));
        assert!(!pos.is_held_by("0xdef"));
        assert_eq!(pos.after_reduce(dec!(3)), Decimal::ZERO);
    }

    #[test]
    fn test_loss_ratio() {
        let pos = VenuePosition {
            market_index: 0,
            symbol: "ETH".to_string(),
            side: Side::Long,
            size: dec!(1),
            entry_price: dec!(3000),
            position_value: dec!(1000),
            unrealized_pnl: dec!(-600),
        };
        assert_eq!(pos.loss_ratio(), dec!(-0.6));
    }
}
