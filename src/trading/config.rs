//! Follow configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::api::RetryPolicy;

/// How much of our balance an opening follow commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioMode {
    /// Fixed fraction of our balance
    Fixed(Decimal),
    /// The source wallet's own position value / equity
    SourceExposure,
}

impl RatioMode {
    /// Parse "source" or a fraction like "0.1".
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "source" | "source_exposure" => Some(Self::SourceExposure),
            other => other
                .parse::<Decimal>()
                .ok()
                .filter(|r| *r > Decimal::ZERO && *r <= Decimal::ONE)
                .map(Self::Fixed),
        }
    }
}

/// How much of the mirrored position a DECREASE unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecreaseMode {
    /// Half of what we hold
    Half,
    /// The same fraction the source wallet reduced by
    Proportional,
}

impl DecreaseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "half" => Some(Self::Half),
            "proportional" | "prop" => Some(Self::Proportional),
            _ => None,
        }
    }
}

/// Configuration for follow decisions and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    /// Share of our balance committed per opening follow
    pub ratio_mode: RatioMode,

    /// Notional cap when the wallet has no override (USD)
    pub default_max_position_usd: Decimal,

    /// Loss ratio that forces a close when the wallet has no override (0.0 to 1.0)
    pub default_stop_loss_ratio: Decimal,

    /// Sizing for DECREASE events
    pub decrease_mode: DecreaseMode,

    /// Slippage cap for market orders (0.0 to 1.0)
    pub max_slippage: Decimal,

    /// How long a fetched balance is reused
    #[serde(with = "duration_secs")]
    pub balance_ttl: Duration,

    /// Retry envelope for every venue call
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            ratio_mode: RatioMode::Fixed(dec!(0.1)), // 10% of balance
            default_max_position_usd: dec!(1000),
            default_stop_loss_ratio: dec!(0.5), // Close at -50%
            decrease_mode: DecreaseMode::Half,
            max_slippage: dec!(0.01), // 1%
            balance_ttl: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
