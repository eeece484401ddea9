//! Wire types for the Hyperliquid info API and the Lighter REST API.
//!
//! Numeric fields arrive as strings and are kept that way here; the clients
//! parse them so a malformed value can be reported with its symbol.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::venue::VenueError;

/// Parse a decimal string field, naming what it belongs to on failure.
pub fn parse_amount(what: &str, value: &str) -> Result<Decimal, VenueError> {
    Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|_| VenueError::Malformed(format!("{}: {:?}", what, value)))
}

/// Parse an optional decimal field, treating absence as zero.
pub fn parse_optional_amount(what: &str, value: Option<&str>) -> Result<Decimal, VenueError> {
    match value {
        Some(v) if !v.is_empty() => parse_amount(what, v),
        _ => Ok(Decimal::ZERO),
    }
}

// ==================== Hyperliquid ====================

/// Body of a `clearinghouseState` info request.
#[derive(Debug, Clone, Serialize)]
pub struct InfoRequest<'a> {
    #[serde(rename = "type")]
    pub request_type: &'a str,
    pub user: &'a str,
}

/// Response of a `clearinghouseState` info request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
    #[serde(default)]
    pub withdrawable: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    #[serde(default)]
    pub total_margin_used: Option<String>,
    #[serde(default)]
    pub total_ntl_pos: Option<String>,
}

/// Position entry, kept raw so it can travel with the snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: serde_json::Value,
}

/// Fields read from an asset position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperliquidPosition {
    pub coin: String,
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    #[serde(default)]
    pub position_value: Option<String>,
    #[serde(default)]
    pub unrealized_pnl: Option<String>,
}

// ==================== Lighter ====================

/// Response from `/api/v1/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    #[serde(default)]
    pub accounts: Vec<LighterAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LighterAccount {
    #[serde(default)]
    pub index: Option<u64>,
    #[serde(default)]
    pub collateral: Option<String>,
    pub available_balance: String,
    #[serde(default)]
    pub positions: Vec<LighterPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LighterPosition {
    pub market_id: u32,
    #[serde(default)]
    pub symbol: String,

    /// 1 for long, -1 for short
    pub sign: i32,

    /// Absolute size
    pub position: String,

    #[serde(default)]
    pub avg_entry_price: Option<String>,
    #[serde(default)]
    pub position_value: Option<String>,
    #[serde(default)]
    pub unrealized_pnl: Option<String>,
}

/// Response from `/api/v1/orderBookOrders`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookOrders {
    #[serde(default)]
    pub bids: Vec<BookOrder>,
    #[serde(default)]
    pub asks: Vec<BookOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookOrder {
    pub price: String,
    #[serde(default)]
    pub remaining_base_amount: Option<String>,
}

/// Response from `/api/v1/nextNonce`.
#[derive(Debug, Clone, Deserialize)]
pub struct NextNonce {
    pub nonce: i64,
}

/// Create-order transaction body, signed before submission.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderTx {
    pub account_index: u64,
    pub api_key_index: u8,
    pub market_index: u32,
    pub client_order_index: u64,

    /// Size in the market's base units
    pub base_amount: i64,

    /// Worst price in the market's price units
    pub price: i64,

    pub is_ask: bool,

    #[serde(rename = "type")]
    pub order_type: u8,

    pub time_in_force: u8,
    pub reduce_only: bool,
    pub order_expiry: i64,
    pub nonce: i64,
}

/// Signed transaction envelope for `/api/v1/sendTx`.
#[derive(Debug, Clone, Serialize)]
pub struct SendTxRequest {
    pub tx_type: u8,
    pub tx_info: String,
}

/// Response from `/api/v1/sendTx`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendTxResponse {
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("ETH szi", "-1.25").unwrap(), dec!(-1.25));
        assert_eq!(parse_optional_amount("ETH entryPx", None).unwrap(), Decimal::ZERO);
        assert!(matches!(
            parse_amount("ETH szi", "abc"),
            Err(VenueError::Malformed(_))
        ));
    }

    #[test]
    fn test_clearinghouse_state_deserializes() {
        let json = r#"{
            "marginSummary": {"accountValue": "10000.0", "totalMarginUsed": "2500.5", "totalNtlPos": "5000"},
            "assetPositions": [
                {"type": "oneWay", "position": {"coin": "ETH", "szi": "-2.0", "entryPx": "3000.0",
                 "positionValue": "6000.0", "unrealizedPnl": "-12.5"}}
            ],
            "withdrawable": "7499.5"
        }"#;

        let state: ClearinghouseState = serde_json::from_str(json).unwrap();
        assert_eq!(state.margin_summary.account_value, "10000.0");
        assert_eq!(state.asset_positions.len(), 1);

        let pos: HyperliquidPosition =
            serde_json::from_value(state.asset_positions[0].position.clone()).unwrap();
        assert_eq!(pos.coin, "ETH");
        assert_eq!(pos.szi, "-2.0");
    }
}
