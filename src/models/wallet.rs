//! Tracked source wallet configuration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-wallet follow settings, owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWalletConfig {
    /// Wallet address, lower-case
    pub address: String,

    /// Whether events from this wallet are followed
    pub enabled: bool,

    /// Cap on follow notional, overriding the default
    pub max_position_usd: Option<Decimal>,

    /// Loss ratio that triggers a forced close, overriding the default
    pub stop_loss_ratio: Option<Decimal>,

    /// Display label
    #[serde(default)]
    pub nickname: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedWalletConfig {
    /// Label for display: nickname when set, else the truncated address.
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(name) if !name.is_empty() => name.clone(),
            _ => short_address(&self.address),
        }
    }
}

/// Truncate a wallet address to `0x1234...abcd`.
pub fn short_address(address: &str) -> String {
    if address.len() > 12 {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

/// `0x` followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
