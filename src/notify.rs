//! Notifications for events, follow results, stop-losses and close-all.
//!
//! Delivery failures are logged and never block the trading loop.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::models::{short_address, OrderResult, PositionEvent};
use crate::trading::{FollowDecision, FollowResult, StopLossHit};

/// Message sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) {
        info!(target: "notify", "{}", message.replace('\n', " | "));
    }
}

/// Telegram Bot API sink.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            http,
            bot_token,
            chat_id,
        })
    }

    /// Built from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`, `None` when either is unset.
    pub fn from_env() -> Result<Option<Self>> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty());
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|c| !c.is_empty());

        match (token, chat_id) {
            (Some(token), Some(chat_id)) => Ok(Some(Self::new(token, chat_id)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = %resp.status(), "Telegram sendMessage returned non-2xx");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to send Telegram notification");
            }
        }
    }
}

pub fn format_startup(dry_run: bool, wallets: usize, mirrored: usize) -> String {
    let mode = if dry_run { "dry run" } else { "live" };
    format!(
        "*HyperTrack started* ({})\nTracking {} wallet(s), {} mirrored position(s)",
        mode, wallets, mirrored
    )
}

pub fn format_shutdown() -> String {
    "*HyperTrack stopped*".to_string()
}

/// Detected source wallet event.
pub fn format_event(event: &PositionEvent) -> String {
    format!(
        "*{} detected*\nSymbol: {}\nSide: {}\nSize: {} -> {}\nPrice: {}\nWallet: `{}`",
        event.kind,
        event.symbol,
        event.side,
        event.previous_size,
        event.size,
        event.price,
        short_address(&event.wallet_address),
    )
}

/// FOLLOW or ERROR result. Other decisions are not announced.
pub fn format_follow_result(result: &FollowResult) -> Option<String> {
    let side = result.side.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    let size = result.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    let price = result
        .price
        .map(|p| p.round_dp(4).to_string())
        .unwrap_or_else(|| "-".to_string());
    let wallet = short_address(&result.wallet_address);

    match result.decision {
        FollowDecision::Follow => Some(format!(
            "*Followed {}*\nSymbol: {}\nSide: {}\nSize: {}\nPrice: {}\nWallet: `{}`",
            result.kind, result.symbol, side, size, price, wallet,
        )),
        FollowDecision::Error => Some(format!(
            "*Follow failed*\nSymbol: {}\nSide: {}\nSize: {}\nPrice: {}\nWallet: `{}`\nReason: {}",
            result.symbol, side, size, price, wallet, result.reason,
        )),
        FollowDecision::Skip | FollowDecision::Reject => None,
    }
}

pub fn format_stop_loss(hit: &StopLossHit) -> String {
    let outcome = if hit.order.success {
        "closed".to_string()
    } else {
        format!(
            "close failed: {}",
            hit.order.error.as_deref().unwrap_or("unknown")
        )
    };

    format!(
        "*Stop-loss {}*\nLoss: {}% (limit {}%)\nWallet: `{}`\nResult: {}",
        hit.symbol,
        (hit.loss_ratio * rust_decimal::Decimal::ONE_HUNDRED).round_dp(2),
        (hit.threshold * rust_decimal::Decimal::ONE_HUNDRED).round_dp(2),
        short_address(&hit.source_wallet),
        outcome,
    )
}

pub fn format_close_all(results: &BTreeMap<String, OrderResult>) -> String {
    if results.is_empty() {
        return "*Close all*\nNo open positions".to_string();
    }

    let mut message = String::from("*Close all*");
    for (symbol, result) in results {
        if result.success {
            message.push_str(&format!("\n{}: closed", symbol));
        } else {
            message.push_str(&format!(
                "\n{}: failed ({})",
                symbol,
                result.error.as_deref().unwrap_or("unknown")
            ));
        }
    }
    message
}
