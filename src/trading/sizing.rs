//! Follow sizing: how much to trade for each kind of event.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::PositionEvent;

use super::config::{DecreaseMode, FollowConfig, RatioMode};

// Sizes are kept to this many places; the venue truncates further.
const SIZE_DP: u32 = 8;

/// Calculator for follow sizes.
pub struct FollowSizer {
    config: FollowConfig,
}

impl FollowSizer {
    pub fn new(config: FollowConfig) -> Self {
        Self { config }
    }

    /// Fraction of our balance an opening follow commits.
    pub fn position_ratio(&self, event: &PositionEvent) -> Decimal {
        match self.config.ratio_mode {
            RatioMode::Fixed(ratio) => ratio,
            RatioMode::SourceExposure => event.source_position_ratio.max(Decimal::ZERO),
        }
    }

    /// Notional for an OPEN or INCREASE: balance x ratio, capped.
    ///
    /// # Arguments
    /// * `balance` - Our available balance (USD)
    /// * `event` - The source event being followed
    /// * `max_position_usd` - The wallet's cap override, if any
    pub fn open_notional(
        &self,
        balance: Decimal,
        event: &PositionEvent,
        max_position_usd: Option<Decimal>,
    ) -> Decimal {
        let cap = max_position_usd.unwrap_or(self.config.default_max_position_usd);
        (balance * self.position_ratio(event)).min(cap).max(Decimal::ZERO)
    }

    /// Base size for an OPEN or INCREASE at `price`. Zero when the price is unusable.
    pub fn open_size(
        &self,
        balance: Decimal,
        price: Decimal,
        event: &PositionEvent,
        max_position_usd: Option<Decimal>,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let notional = self.open_notional(balance, event, max_position_usd);
        (notional / price).round_dp_with_strategy(SIZE_DP, RoundingStrategy::ToZero)
    }

    /// Base size to unwind on a DECREASE given what we hold.
    pub fn decrease_size(&self, held: Decimal, event: &PositionEvent) -> Decimal {
        if held <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let fraction = match self.config.decrease_mode {
            DecreaseMode::Half => Decimal::new(5, 1),
            DecreaseMode::Proportional => {
                if event.previous_size > Decimal::ZERO {
                    ((event.previous_size - event.size) / event.previous_size)
                        .clamp(Decimal::ZERO, Decimal::ONE)
                } else {
                    Decimal::ONE
                }
            }
        };

        (held * fraction).round_dp_with_strategy(SIZE_DP, RoundingStrategy::ToZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn event(kind: EventKind, previous: Decimal, size: Decimal) -> PositionEvent {
        PositionEvent {
            kind,
            symbol: "ETH".to_string(),
            side: Side::Long,
            size,
            previous_size: previous,
            price: dec!(3000),
            wallet_address: "0xabc".to_string(),
            source_position_ratio: dec!(0.3),
            timestamp: Utc::now(),
            raw: None,
        }
    }

    #[test]
    fn test_open_notional_is_capped() {
        let sizer = FollowSizer::new(FollowConfig::default());
        let open = event(EventKind::Open, dec!(0), dec!(1));

        // 10% of 10k is 1000, capped at the wallet's 500
        assert_eq!(sizer.open_notional(dec!(10000), &open, Some(dec!(500))), dec!(500));
        // Default cap is 1000
        assert_eq!(sizer.open_notional(dec!(50000), &open, None), dec!(1000));
        assert_eq!(sizer.open_notional(dec!(2000), &open, None), dec!(200));
    }

    #[test]
    fn test_open_size_divides_by_price() {
        let sizer = FollowSizer::new(FollowConfig::default());
        let open = event(EventKind::Open, dec!(0), dec!(1));

        assert_eq!(sizer.open_size(dec!(10000), dec!(2500), &open, Some(dec!(500))), dec!(0.2));
        assert_eq!(sizer.open_size(dec!(10000), dec!(3), &open, None), dec!(333.33333333));
        assert_eq!(sizer.open_size(dec!(10000), Decimal::ZERO, &open, None), Decimal::ZERO);
    }

    #[test]
    fn test_source_exposure_ratio() {
        let sizer = FollowSizer::new(FollowConfig {
            ratio_mode: RatioMode::SourceExposure,
            ..Default::default()
        });
        let open = event(EventKind::Open, dec!(0), dec!(1));

        assert_eq!(sizer.open_notional(dec!(1000), &open, None), dec!(300));
    }

    #[test]
    fn test_decrease_halves_held() {
        let sizer = FollowSizer::new(FollowConfig::default());
        let decrease = event(EventKind::Decrease, dec!(4), dec!(3));

        assert_eq!(sizer.decrease_size(dec!(2.0), &decrease), dec!(1.0));
        assert_eq!(sizer.decrease_size(Decimal::ZERO, &decrease), Decimal::ZERO);
    }

    #[test]
    fn test_decrease_proportional() {
        let sizer = FollowSizer::new(FollowConfig {
            decrease_mode: DecreaseMode::Proportional,
            ..Default::default()
        });

        // Source went 4 -> 3: a quarter
        let decrease = event(EventKind::Decrease, dec!(4), dec!(3));
        assert_eq!(sizer.decrease_size(dec!(2), &decrease), dec!(0.5));
    }
}
