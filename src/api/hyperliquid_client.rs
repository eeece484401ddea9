//! Hyperliquid info API client for reading source wallet state.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::models::{SnapshotPosition, WalletSnapshot};

use super::types::*;
use super::venue::{SnapshotSource, VenueError};

const MAINNET_API_BASE: &str = "https://api.hyperliquid.xyz";
const TESTNET_API_BASE: &str = "https://api.hyperliquid-testnet.xyz";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Hyperliquid info endpoint (read-only operations).
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
}

impl HyperliquidClient {
    /// Create a new client for mainnet or testnet.
    pub fn new(testnet: bool) -> Result<Self> {
        let base_url = if testnet {
            TESTNET_API_BASE
        } else {
            MAINNET_API_BASE
        };
        Self::with_base_url(base_url.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch the raw clearinghouse state for a wallet.
    pub async fn clearinghouse_state(&self, address: &str) -> Result<ClearinghouseState, VenueError> {
        let url = format!("{}/info", self.base_url);

        debug!(address = %address, "Fetching clearinghouse state");

        let response = self
            .client
            .post(&url)
            .json(&InfoRequest {
                request_type: "clearinghouseState",
                user: address,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::Status { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| VenueError::Malformed(format!("clearinghouseState for {}: {}", address, e)))
    }
}

/// Convert a clearinghouse state into a snapshot.
///
/// Any malformed position fails the whole snapshot.
pub fn snapshot_from_state(
    address: &str,
    state: ClearinghouseState,
) -> Result<WalletSnapshot, VenueError> {
    let account_value = parse_amount("accountValue", &state.margin_summary.account_value)?;
    let margin_used = parse_optional_amount(
        "totalMarginUsed",
        state.margin_summary.total_margin_used.as_deref(),
    )?;

    let mut positions = Vec::with_capacity(state.asset_positions.len());
    for asset in state.asset_positions {
        let pos: HyperliquidPosition = serde_json::from_value(asset.position.clone())
            .map_err(|e| VenueError::Malformed(format!("asset position: {}", e)))?;

        positions.push(SnapshotPosition {
            size: parse_amount(&format!("{} szi", pos.coin), &pos.szi)?,
            entry_price: parse_optional_amount(
                &format!("{} entryPx", pos.coin),
                pos.entry_px.as_deref(),
            )?,
            position_value: parse_optional_amount(
                &format!("{} positionValue", pos.coin),
                pos.position_value.as_deref(),
            )?,
            unrealized_pnl: parse_optional_amount(
                &format!("{} unrealizedPnl", pos.coin),
                pos.unrealized_pnl.as_deref(),
            )?,
            symbol: pos.coin,
            raw: Some(asset.position),
        });
    }

    Ok(WalletSnapshot::new(
        address,
        account_value,
        account_value - margin_used,
        positions,
    ))
}

#[async_trait]
impl SnapshotSource for HyperliquidClient {
    async fn fetch_snapshot(&self, address: &str) -> Result<WalletSnapshot, VenueError> {
        let state = self.clearinghouse_state(address).await?;
        snapshot_from_state(address, state)
    }
}
