//! Follow decision engine: turns source wallet events into mirror orders.
//!
//! Each event is checked in order:
//! 1. the wallet is tracked and enabled
//! 2. no other wallet holds the symbol lock
//! 3. we have balance to trade with
//! 4. the event kind is known
//!
//! then sized, executed, and recorded against the symbol lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::tradable_size;
use crate::db::{Database, LockAcquisition};
use crate::models::{
    short_address, EventKind, MirroredPosition, OrderResult, OrderSide, PositionEvent,
    TrackedWalletConfig, TradeRecord,
};

use super::balance::BalanceCache;
use super::config::FollowConfig;
use super::executor::OrderExecutor;
use super::sizing::FollowSizer;

/// Outcome class of a follow decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowDecision {
    /// Order executed and bookkeeping updated
    Follow,
    /// Not eligible or nothing to do
    Skip,
    /// Eligible but contradicts what we hold
    Reject,
    /// Order or remote call failed
    Error,
}

impl FollowDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowDecision::Follow => "FOLLOW",
            FollowDecision::Skip => "SKIP",
            FollowDecision::Reject => "REJECT",
            FollowDecision::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for FollowDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, Serialize)]
pub struct FollowResult {
    pub decision: FollowDecision,
    pub reason: String,
    pub symbol: String,
    pub kind: EventKind,
    pub wallet_address: String,

    /// Direction of the follow order, when one was sized
    pub side: Option<OrderSide>,

    pub size: Option<Decimal>,

    /// Mirror venue reference price
    pub price: Option<Decimal>,

    /// Set when an order was attempted
    pub order: Option<OrderResult>,
}

impl FollowResult {
    fn new(decision: FollowDecision, event: &PositionEvent, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            symbol: event.symbol.clone(),
            kind: event.kind,
            wallet_address: event.wallet_address.clone(),
            side: None,
            size: None,
            price: None,
            order: None,
        }
    }

    pub fn skip(event: &PositionEvent, reason: impl Into<String>) -> Self {
        Self::new(FollowDecision::Skip, event, reason)
    }

    pub fn reject(event: &PositionEvent, reason: impl Into<String>) -> Self {
        Self::new(FollowDecision::Reject, event, reason)
    }

    pub fn error(event: &PositionEvent, reason: impl Into<String>) -> Self {
        Self::new(FollowDecision::Error, event, reason)
    }

    fn with_order(mut self, side: OrderSide, size: Decimal, price: Decimal, order: OrderResult) -> Self {
        self.side = Some(side);
        self.size = Some(size);
        self.price = Some(price);
        self.order = Some(order);
        self
    }

    pub fn is_follow(&self) -> bool {
        self.decision == FollowDecision::Follow
    }
}

/// A position force-closed by the stop-loss sweep.
#[derive(Debug, Clone)]
pub struct StopLossHit {
    pub symbol: String,
    pub source_wallet: String,
    pub loss_ratio: Decimal,
    pub threshold: Decimal,
    pub order: OrderResult,
}

/// Decides whether and how to mirror each source wallet event.
pub struct FollowEngine {
    db: Arc<Database>,
    executor: Arc<OrderExecutor>,
    sizer: FollowSizer,
    balance: BalanceCache,
    config: FollowConfig,
}

impl FollowEngine {
    pub fn new(db: Arc<Database>, executor: Arc<OrderExecutor>, config: FollowConfig) -> Self {
        Self {
            db,
            executor,
            sizer: FollowSizer::new(config.clone()),
            balance: BalanceCache::new(config.balance_ttl),
            config,
        }
    }

    /// Handle one event. Never fails: unexpected errors become an ERROR result.
    pub async fn on_wallet_event(&self, event: &PositionEvent) -> FollowResult {
        let result = match self.handle_event(event).await {
            Ok(result) => result,
            Err(e) => {
                error!(event = %event, error = %e, "Follow handling failed");
                FollowResult::error(event, format!("{:#}", e))
            }
        };

        info!(
            decision = %result.decision,
            symbol = %result.symbol,
            wallet = %short_address(&event.wallet_address),
            reason = %result.reason,
            "Follow decision"
        );

        result
    }

    async fn handle_event(&self, event: &PositionEvent) -> Result<FollowResult> {
        let wallet = match self.db.get_wallet_config(&event.wallet_address).await? {
            Some(w) if w.enabled => w,
            Some(_) => return Ok(FollowResult::skip(event, "wallet disabled")),
            None => return Ok(FollowResult::skip(event, "wallet not tracked")),
        };

        let held = self.db.get_mirrored_position(&event.symbol).await?;
        if let Some(h) = &held {
            if !h.is_held_by(&event.wallet_address) {
                return Ok(FollowResult::skip(
                    event,
                    format!("{} locked by {}", event.symbol, short_address(&h.source_wallet)),
                ));
            }
        }

        let balance = self.current_balance().await;
        if balance <= Decimal::ZERO {
            return Ok(FollowResult::skip(event, "no available balance"));
        }

        match event.kind {
            EventKind::Close | EventKind::Flip => self.follow_close(event, held).await,
            EventKind::Open | EventKind::Increase => {
                self.follow_open(event, &wallet, held, balance).await
            }
            EventKind::Decrease => self.follow_decrease(event, held).await,
            EventKind::Unknown => Ok(FollowResult::skip(event, "unclassified position change")),
        }
    }

    async fn current_balance(&self) -> Decimal {
        self.balance.get(|| self.executor.get_balance()).await
    }

    /// Mirror price, or the result to return when there is none.
    async fn reference_price(&self, event: &PositionEvent) -> Result<Decimal, FollowResult> {
        match self.executor.get_price(&event.symbol).await {
            Ok(Some(price)) => Ok(price),
            Ok(None) => Err(FollowResult::skip(
                event,
                format!("no price available for {}", event.symbol),
            )),
            Err(e) => Err(FollowResult::error(event, e.to_string())),
        }
    }

    async fn follow_close(
        &self,
        event: &PositionEvent,
        held: Option<MirroredPosition>,
    ) -> Result<FollowResult> {
        let held = match held {
            Some(h) if !h.is_pending() => h,
            Some(_) => {
                self.db
                    .release_pending_claim(&event.symbol, &event.wallet_address)
                    .await?;
                return Ok(FollowResult::skip(event, "no mirrored position to close"));
            }
            None => return Ok(FollowResult::skip(event, "no mirrored position to close")),
        };

        let price = match self.reference_price(event).await {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };
        let side = OrderSide::closing(held.side);

        let order = self.executor.close_position(&event.symbol).await;
        if !order.success {
            let reason = order.error.clone().unwrap_or_else(|| "close failed".to_string());
            return Ok(FollowResult::error(event, reason).with_order(side, held.size, price, order));
        }

        self.db
            .delete_mirrored_position(&event.symbol, &event.wallet_address)
            .await?;
        self.balance.invalidate().await;

        // The venue closes its own size, which may differ from our record
        let closed = order.submitted_size();
        let reason = if order.order_id.is_none() {
            warn!(
                symbol = %event.symbol,
                recorded = %held.size,
                "Mirrored position already flat on venue"
            );
            "mirrored position already flat on venue"
        } else if event.kind == EventKind::Flip {
            "closed mirrored position (flip close leg)"
        } else {
            "closed mirrored position"
        };
        if order.order_id.is_some() {
            self.record_trade(event, side, closed, price, &order).await;
        }

        Ok(FollowResult::new(FollowDecision::Follow, event, reason)
            .with_order(side, closed, price, order))
    }

    async fn follow_open(
        &self,
        event: &PositionEvent,
        wallet: &TrackedWalletConfig,
        held: Option<MirroredPosition>,
        balance: Decimal,
    ) -> Result<FollowResult> {
        if let Some(h) = &held {
            if !h.is_pending() && h.side != event.side {
                return Ok(FollowResult::reject(
                    event,
                    format!("holding {} {} but event is {}", event.symbol, h.side, event.side),
                ));
            }
        }

        let price = match self.reference_price(event).await {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };

        let size = tradable_size(
            &event.symbol,
            self.sizer
                .open_size(balance, price, event, wallet.max_position_usd),
        );
        if size <= Decimal::ZERO {
            return Ok(FollowResult::skip(event, "follow size is zero"));
        }

        let fresh_claim = match self
            .db
            .acquire_symbol_lock(&event.symbol, event.side, &event.wallet_address)
            .await?
        {
            LockAcquisition::Claimed => true,
            LockAcquisition::AlreadyHeld => false,
            LockAcquisition::HeldBy(holder) => {
                return Ok(FollowResult::skip(
                    event,
                    format!("{} locked by {}", event.symbol, short_address(&holder)),
                ));
            }
        };

        let side = OrderSide::opening(event.side);
        let order = self
            .executor
            .place_market_order(&event.symbol, side, size, false, None)
            .await;

        if !order.success {
            if fresh_claim {
                self.db
                    .release_pending_claim(&event.symbol, &event.wallet_address)
                    .await?;
            }
            let reason = order.error.clone().unwrap_or_else(|| "order failed".to_string());
            return Ok(FollowResult::error(event, reason).with_order(side, size, price, order));
        }

        let filled = order.submitted_size();
        self.balance.invalidate().await;
        self.record_trade(event, side, filled, price, &order).await;

        let updated = match self.store_open_fill(event, filled, price).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(
                    symbol = %event.symbol,
                    size = %filled,
                    error = %e,
                    "Order filled but mirrored position not stored"
                );
                if fresh_claim {
                    if let Err(e) = self
                        .db
                        .release_pending_claim(&event.symbol, &event.wallet_address)
                        .await
                    {
                        warn!(symbol = %event.symbol, error = %e, "Failed to release claim");
                    }
                }
                return Ok(FollowResult::error(
                    event,
                    format!("order filled but not recorded: {:#}", e),
                )
                .with_order(side, filled, price, order));
            }
        };
        if !updated {
            warn!(symbol = %event.symbol, "Symbol lock changed hands during order");
        }

        Ok(FollowResult::new(
            FollowDecision::Follow,
            event,
            format!("mirrored {} {} {}", event.kind, filled, event.symbol),
        )
        .with_order(side, filled, price, order))
    }

    /// Add a fill to the mirrored position, trying the write twice.
    async fn store_open_fill(
        &self,
        event: &PositionEvent,
        filled: Decimal,
        price: Decimal,
    ) -> Result<bool> {
        match self.write_open_fill(event, filled, price).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                warn!(symbol = %event.symbol, error = %e, "Mirrored position write failed, retrying");
                self.write_open_fill(event, filled, price).await
            }
        }
    }

    async fn write_open_fill(
        &self,
        event: &PositionEvent,
        filled: Decimal,
        price: Decimal,
    ) -> Result<bool> {
        let (new_size, entry_price) = match self.db.get_mirrored_position(&event.symbol).await? {
            Some(current) => current.after_add(filled, price),
            None => (filled, price),
        };
        self.db
            .upsert_mirrored_position(
                &event.symbol,
                event.side,
                new_size,
                entry_price,
                &event.wallet_address,
            )
            .await
    }

    async fn follow_decrease(
        &self,
        event: &PositionEvent,
        held: Option<MirroredPosition>,
    ) -> Result<FollowResult> {
        let Some(mut held) = held.filter(|h| !h.is_pending()) else {
            return Ok(FollowResult::skip(event, "no mirrored position to reduce"));
        };

        // Size off what the venue holds; the record only stands in when it reports nothing
        match self.executor.get_position(&event.symbol).await {
            Ok(Some(position)) => {
                if position.size != held.size {
                    debug!(
                        symbol = %event.symbol,
                        recorded = %held.size,
                        venue = %position.size,
                        "Mirrored size differs from venue"
                    );
                }
                held.size = position.size;
            }
            Ok(None) => {}
            Err(e) => return Ok(FollowResult::error(event, e.to_string())),
        }

        let size = tradable_size(&event.symbol, self.sizer.decrease_size(held.size, event));
        if size <= Decimal::ZERO {
            return Ok(FollowResult::skip(event, "follow size is zero"));
        }

        let price = match self.reference_price(event).await {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };

        let side = OrderSide::closing(held.side);
        let order = self
            .executor
            .place_market_order(&event.symbol, side, size, true, None)
            .await;

        if !order.success {
            let reason = order.error.clone().unwrap_or_else(|| "order failed".to_string());
            return Ok(FollowResult::error(event, reason).with_order(side, size, price, order));
        }

        let reduced = order.submitted_size();
        let remaining = held.after_reduce(reduced);
        if remaining <= Decimal::ZERO {
            self.db
                .delete_mirrored_position(&event.symbol, &event.wallet_address)
                .await?;
        } else {
            self.db
                .upsert_mirrored_position(
                    &event.symbol,
                    held.side,
                    remaining,
                    held.entry_price,
                    &event.wallet_address,
                )
                .await?;
        }

        self.balance.invalidate().await;
        self.record_trade(event, side, reduced, price, &order).await;

        Ok(FollowResult::new(
            FollowDecision::Follow,
            event,
            format!("reduced {} by {}", event.symbol, reduced),
        )
        .with_order(side, reduced, price, order))
    }

    async fn record_trade(
        &self,
        event: &PositionEvent,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        order: &OrderResult,
    ) {
        let trade = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: event.symbol.clone(),
            side,
            size,
            price,
            kind: event.kind,
            source_wallet: event.wallet_address.clone(),
            order_id: order.order_id.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.db.record_trade(&trade).await {
            warn!(symbol = %event.symbol, error = %e, "Failed to record trade");
        }
    }

    /// Force-close mirrored positions whose loss breaches their stop-loss ratio.
    pub async fn check_stop_losses(&self) -> Result<Vec<StopLossHit>> {
        let positions = self.executor.get_positions().await?;
        let mut hits = Vec::new();

        for position in positions {
            let Some(held) = self.db.get_mirrored_position(&position.symbol).await? else {
                continue;
            };

            let threshold = self
                .db
                .get_wallet_config(&held.source_wallet)
                .await?
                .and_then(|w| w.stop_loss_ratio)
                .unwrap_or(self.config.default_stop_loss_ratio);
            let loss_ratio = position.loss_ratio();

            if loss_ratio > -threshold {
                debug!(symbol = %position.symbol, loss_ratio = %loss_ratio, "Within stop-loss");
                continue;
            }

            warn!(
                symbol = %position.symbol,
                loss_ratio = %loss_ratio,
                threshold = %threshold,
                "Stop-loss triggered"
            );

            let order = self.executor.close_venue_position(&position).await;
            if order.success {
                self.db
                    .delete_mirrored_position(&position.symbol, &held.source_wallet)
                    .await?;
                self.balance.invalidate().await;
            }

            hits.push(StopLossHit {
                symbol: position.symbol,
                source_wallet: held.source_wallet,
                loss_ratio,
                threshold,
                order,
            });
        }

        Ok(hits)
    }

    /// Close every venue position and release the locks of the ones closed.
    pub async fn close_all(&self) -> Result<BTreeMap<String, OrderResult>> {
        let results = self.executor.close_all_positions().await?;

        for (symbol, result) in &results {
            if !result.success {
                continue;
            }
            if let Some(held) = self.db.get_mirrored_position(symbol).await? {
                self.db
                    .delete_mirrored_position(symbol, &held.source_wallet)
                    .await?;
            }
        }

        self.balance.invalidate().await;
        Ok(results)
    }
}
