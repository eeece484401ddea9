//! Lighter REST client for the mirror account.
//!
//! Handles:
//! - account balance and position queries
//! - order book tops for pricing
//! - signing and submitting market orders
//!
//! Orders are signed with the API key's secp256k1 key over the keccak hash of
//! the serialized transaction body.

use std::str::FromStr;
use std::time::Duration;

use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{OrderSide, Side, VenuePosition};

use super::types::*;
use super::venue::{BookTop, ExecutionVenue, MarketOrder, OrderAck, VenueError};

/// Lighter API base URLs
pub const MAINNET_URL: &str = "https://mainnet.zklighter.elliot.ai";
pub const TESTNET_URL: &str = "https://testnet.zklighter.elliot.ai";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const TX_TYPE_CREATE_ORDER: u8 = 14;
const ORDER_TYPE_MARKET: u8 = 1;
const TIME_IN_FORCE_IOC: u8 = 0;

/// A perpetual market on Lighter and its integer precisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSpec {
    pub symbol: &'static str,
    pub index: u32,
    pub size_decimals: u32,
    pub price_decimals: u32,
}

/// Markets the bot can mirror.
pub const MARKETS: &[MarketSpec] = &[
    MarketSpec {
        symbol: "ETH",
        index: 0,
        size_decimals: 4,
        price_decimals: 2,
    },
    MarketSpec {
        symbol: "BTC",
        index: 1,
        size_decimals: 5,
        price_decimals: 1,
    },
    MarketSpec {
        symbol: "SOL",
        index: 2,
        size_decimals: 3,
        price_decimals: 3,
    },
];

/// Strip pair suffixes so "eth-perp", "ETH/USDC" and "ETH" agree.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .to_uppercase()
        .replace("-PERP", "")
        .replace("/USDC", "")
        .replace("-USD", "")
}

/// Look up the market for a symbol.
pub fn market_for_symbol(symbol: &str) -> Result<&'static MarketSpec, VenueError> {
    let clean = normalize_symbol(symbol);
    MARKETS
        .iter()
        .find(|m| m.symbol == clean)
        .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
}

/// Symbol for a market index, `UNKNOWN_<n>` when unmapped.
pub fn symbol_for_market(index: u32) -> String {
    MARKETS
        .iter()
        .find(|m| m.index == index)
        .map(|m| m.symbol.to_string())
        .unwrap_or_else(|| format!("UNKNOWN_{}", index))
}

/// Truncate `size` to the market's size precision. Unmapped symbols pass through.
pub fn tradable_size(symbol: &str, size: Decimal) -> Decimal {
    match market_for_symbol(symbol) {
        Ok(market) => size.round_dp_with_strategy(market.size_decimals, RoundingStrategy::ToZero),
        Err(_) => size,
    }
}

/// Convert a decimal to integer units with `decimals` places, truncating.
fn to_units(value: Decimal, decimals: u32) -> Result<i64, VenueError> {
    (value * Decimal::from(10i64.pow(decimals)))
        .trunc()
        .to_i64()
        .ok_or_else(|| VenueError::Malformed(format!("amount out of range: {}", value)))
}

fn build_http() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Credentials and network selection for the mirror account.
#[derive(Debug, Clone)]
pub struct LighterConfig {
    pub api_private_key: String,
    pub account_index: u64,

    /// API key slot (3-254 are usable)
    pub api_key_index: u8,

    pub testnet: bool,
}

impl LighterConfig {
    /// Read from environment variables:
    /// - LIGHTER_API_PRIVATE_KEY
    /// - LIGHTER_ACCOUNT_INDEX
    /// - LIGHTER_API_KEY_INDEX (defaults to 3)
    /// - LIGHTER_TESTNET (defaults to true)
    pub fn from_env() -> Result<Self> {
        let api_private_key = std::env::var("LIGHTER_API_PRIVATE_KEY")
            .context("LIGHTER_API_PRIVATE_KEY not set")?;
        let account_index: u64 = std::env::var("LIGHTER_ACCOUNT_INDEX")
            .context("LIGHTER_ACCOUNT_INDEX not set")?
            .parse()
            .context("Invalid LIGHTER_ACCOUNT_INDEX")?;
        let api_key_index: u8 = std::env::var("LIGHTER_API_KEY_INDEX")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("Invalid LIGHTER_API_KEY_INDEX")?;
        let testnet = env_flag("LIGHTER_TESTNET", true);

        Ok(Self {
            api_private_key,
            account_index,
            api_key_index,
            testnet,
        })
    }

    pub fn base_url(&self) -> &'static str {
        if self.testnet {
            TESTNET_URL
        } else {
            MAINNET_URL
        }
    }
}

/// Read a boolean environment variable ("true"/"1"/"yes").
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

/// REST client for trading on Lighter.
pub struct LighterClient {
    http: Client,

    /// Absent for a quotes-only client
    signer: Option<PrivateKeySigner>,

    account_index: u64,
    api_key_index: u8,
    base_url: String,
}

impl LighterClient {
    pub fn new(config: &LighterConfig) -> Result<Self> {
        Self::with_base_url(config, config.base_url().to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(config: &LighterConfig, base_url: String) -> Result<Self> {
        let pk = config
            .api_private_key
            .strip_prefix("0x")
            .unwrap_or(&config.api_private_key);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid Lighter API private key")?;

        Ok(Self {
            http: build_http()?,
            signer: Some(signer),
            account_index: config.account_index,
            api_key_index: config.api_key_index,
            base_url,
        })
    }

    /// Client that can read public market data but not trade.
    pub fn quotes_only(testnet: bool) -> Result<Self> {
        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };

        Ok(Self {
            http: build_http()?,
            signer: None,
            account_index: 0,
            api_key_index: 0,
            base_url: base_url.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, VenueError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Lighter GET");

        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError::Status { status, body });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| VenueError::Malformed(format!("{}: {}", path, e)))
    }

    /// Fetch our account record.
    pub async fn account(&self) -> Result<LighterAccount, VenueError> {
        let resp: AccountResponse = self
            .get_json(&format!("/api/v1/account?by=index&value={}", self.account_index))
            .await?;

        resp.accounts.into_iter().next().ok_or_else(|| {
            VenueError::Malformed(format!("account {} not found", self.account_index))
        })
    }

    async fn next_nonce(&self) -> Result<i64, VenueError> {
        let resp: NextNonce = self
            .get_json(&format!(
                "/api/v1/nextNonce?account_index={}&api_key_index={}",
                self.account_index, self.api_key_index
            ))
            .await?;
        Ok(resp.nonce)
    }

    /// Serialize the transaction and attach its signature.
    async fn sign_tx(&self, tx: &CreateOrderTx) -> Result<String, VenueError> {
        let body = serde_json::to_vec(tx).map_err(|e| VenueError::Signing(e.to_string()))?;
        let hash = alloy_primitives::keccak256(&body);

        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| VenueError::Signing("no API key configured".to_string()))?;
        let signature = signer
            .sign_hash(&hash)
            .await
            .map_err(|e| VenueError::Signing(e.to_string()))?;

        let mut info = serde_json::to_value(tx).map_err(|e| VenueError::Signing(e.to_string()))?;
        info["sig"] = serde_json::Value::String(format!("0x{}", hex::encode(signature.as_bytes())));

        Ok(info.to_string())
    }

    fn build_order_tx(
        &self,
        market: &MarketSpec,
        order: &MarketOrder,
        nonce: i64,
    ) -> Result<CreateOrderTx, VenueError> {
        let base_amount = to_units(order.size, market.size_decimals)?;
        if base_amount <= 0 {
            return Err(VenueError::Rejected(format!(
                "size {} below {} precision",
                order.size, market.symbol
            )));
        }

        Ok(CreateOrderTx {
            account_index: self.account_index,
            api_key_index: self.api_key_index,
            market_index: market.index,
            client_order_index: order.client_order_index,
            base_amount,
            price: to_units(order.limit_price, market.price_decimals)?,
            is_ask: order.side == OrderSide::Sell,
            order_type: ORDER_TYPE_MARKET,
            time_in_force: TIME_IN_FORCE_IOC,
            reduce_only: order.reduce_only,
            order_expiry: 0,
            nonce,
        })
    }
}

#[async_trait]
impl ExecutionVenue for LighterClient {
    async fn available_balance(&self) -> Result<Decimal, VenueError> {
        let account = self.account().await?;
        parse_amount("available_balance", &account.available_balance)
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let account = self.account().await?;

        let mut positions = Vec::new();
        for p in account.positions {
            let symbol = if p.symbol.is_empty() {
                symbol_for_market(p.market_id)
            } else {
                p.symbol.to_uppercase()
            };

            let size = parse_amount(&format!("{} position", symbol), &p.position)?.abs();
            if size.is_zero() {
                continue;
            }

            positions.push(VenuePosition {
                market_index: p.market_id,
                side: if p.sign > 0 { Side::Long } else { Side::Short },
                size,
                entry_price: parse_optional_amount(
                    &format!("{} avg_entry_price", symbol),
                    p.avg_entry_price.as_deref(),
                )?,
                position_value: parse_optional_amount(
                    &format!("{} position_value", symbol),
                    p.position_value.as_deref(),
                )?,
                unrealized_pnl: parse_optional_amount(
                    &format!("{} unrealized_pnl", symbol),
                    p.unrealized_pnl.as_deref(),
                )?,
                symbol,
            });
        }

        Ok(positions)
    }

    async fn book_top(&self, symbol: &str) -> Result<BookTop, VenueError> {
        let market = market_for_symbol(symbol)?;
        let book: OrderBookOrders = self
            .get_json(&format!(
                "/api/v1/orderBookOrders?market_id={}&limit=1",
                market.index
            ))
            .await?;

        let bid = book
            .bids
            .first()
            .map(|b| parse_amount(&format!("{} bid", market.symbol), &b.price))
            .transpose()?;
        let ask = book
            .asks
            .first()
            .map(|a| parse_amount(&format!("{} ask", market.symbol), &a.price))
            .transpose()?;

        Ok(BookTop { bid, ask })
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError> {
        let market = market_for_symbol(&order.symbol)?;
        let nonce = self.next_nonce().await?;
        let tx = self.build_order_tx(market, order, nonce)?;
        let tx_info = self.sign_tx(&tx).await?;

        let url = format!("{}/api/v1/sendTx", self.base_url);
        let resp = self
            .http
            .post(&url)
            .form(&SendTxRequest {
                tx_type: TX_TYPE_CREATE_ORDER,
                tx_info,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError::Status { status, body });
        }

        let body = resp.text().await?;
        let result: SendTxResponse = serde_json::from_str(&body)
            .map_err(|e| VenueError::Malformed(format!("sendTx: {}", e)))?;

        if result.code != 200 {
            return Err(VenueError::Rejected(
                result
                    .message
                    .unwrap_or_else(|| format!("code {}", result.code)),
            ));
        }

        Ok(OrderAck {
            tx_ref: result.tx_hash,
        })
    }
}
