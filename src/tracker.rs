//! Wallet state tracker: polls source wallets and turns snapshot diffs into events.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{SnapshotSource, VenueError};
use crate::db::Database;
use crate::models::{EventKind, PositionEvent, Side, WalletSnapshot};

/// Snapshot failures for a single wallet.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No baseline yet; the wallet produces no events until one is taken
    #[error("baseline snapshot for {address} failed: {source}")]
    Baseline {
        address: String,
        #[source]
        source: VenueError,
    },

    /// Poll after a baseline exists; the baseline is kept
    #[error("snapshot for {address} failed: {source}")]
    Poll {
        address: String,
        #[source]
        source: VenueError,
    },
}

impl TrackerError {
    pub fn address(&self) -> &str {
        match self {
            TrackerError::Baseline { address, .. } | TrackerError::Poll { address, .. } => address,
        }
    }
}

/// Classify the move from signed size `old` to `new`.
///
/// Returns `None` when nothing changed.
pub fn classify(old: Decimal, new: Decimal) -> Option<EventKind> {
    if old == new {
        return None;
    }

    let kind = if old.is_zero() {
        EventKind::Open
    } else if new.is_zero() {
        EventKind::Close
    } else if old.is_sign_positive() != new.is_sign_positive() {
        EventKind::Flip
    } else if new.abs() > old.abs() {
        EventKind::Increase
    } else if new.abs() < old.abs() {
        EventKind::Decrease
    } else {
        EventKind::Unknown
    };

    Some(kind)
}

/// Events between two snapshots of the same wallet, at most one per symbol,
/// in symbol order.
pub fn detect_changes(old: &WalletSnapshot, new: &WalletSnapshot) -> Vec<PositionEvent> {
    let symbols: BTreeSet<&String> = old.positions.keys().chain(new.positions.keys()).collect();
    let source_position_ratio = new.position_ratio();

    let mut events = Vec::new();
    for symbol in symbols {
        let old_size = old.size_of(symbol);
        let new_size = new.size_of(symbol);

        let Some(kind) = classify(old_size, new_size) else {
            continue;
        };
        let Some(side) = Side::from_signed(new_size).or_else(|| Side::from_signed(old_size))
        else {
            continue;
        };

        let current = new.positions.get(symbol);
        events.push(PositionEvent {
            kind,
            symbol: symbol.clone(),
            side,
            size: new_size.abs(),
            previous_size: old_size.abs(),
            price: current.map(|p| p.entry_price).unwrap_or(Decimal::ZERO),
            wallet_address: new.address.clone(),
            source_position_ratio,
            timestamp: new.captured_at,
            raw: current
                .or_else(|| old.positions.get(symbol))
                .and_then(|p| p.raw.clone()),
        });
    }

    events
}

/// What one polling cycle produced.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Events in wallet order, then symbol order
    pub events: Vec<PositionEvent>,

    pub errors: Vec<TrackerError>,

    /// Wallets polled this cycle
    pub wallets: usize,
}

/// Tracks every enabled wallet in the store against its last snapshot.
pub struct WalletTracker {
    source: Arc<dyn SnapshotSource>,
    db: Arc<Database>,

    // Last good snapshot per wallet
    baselines: RwLock<HashMap<String, WalletSnapshot>>,

    shutdown: Arc<AtomicBool>,
}

impl WalletTracker {
    pub fn new(source: Arc<dyn SnapshotSource>, db: Arc<Database>) -> Self {
        Self {
            source,
            db,
            baselines: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag, checked between cycles.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Poll every enabled wallet once and diff against the retained snapshots.
    ///
    /// Per-wallet failures are reported in the cycle, never returned; only a
    /// store failure aborts the cycle.
    pub async fn poll_cycle(&self) -> Result<CycleReport> {
        let addresses: Vec<String> = self
            .db
            .list_wallets(true)
            .await?
            .into_iter()
            .map(|w| w.address)
            .collect();

        let fetches = addresses.iter().map(|address| async move {
            (address, self.source.fetch_snapshot(address).await)
        });
        let results = join_all(fetches).await;

        let mut baselines = self.baselines.write().await;
        baselines.retain(|address, _| {
            let keep = addresses.contains(address);
            if !keep {
                debug!(address = %address, "Dropping baseline of untracked wallet");
            }
            keep
        });

        let mut report = CycleReport {
            wallets: addresses.len(),
            ..Default::default()
        };

        for (address, result) in results {
            match result {
                Ok(snapshot) => match baselines.insert(address.clone(), snapshot) {
                    Some(previous) => {
                        if let Some(current) = baselines.get(address) {
                            report.events.extend(detect_changes(&previous, current));
                        }
                    }
                    None => {
                        info!(address = %address, "Baseline snapshot established");
                    }
                },
                Err(source) => {
                    let error = if baselines.contains_key(address) {
                        TrackerError::Poll {
                            address: address.clone(),
                            source,
                        }
                    } else {
                        TrackerError::Baseline {
                            address: address.clone(),
                            source,
                        }
                    };
                    warn!(address = %error.address(), error = %error, "Wallet poll failed");
                    report.errors.push(error);
                }
            }
        }

        debug!(
            wallets = report.wallets,
            events = report.events.len(),
            errors = report.errors.len(),
            "Poll cycle complete"
        );

        Ok(report)
    }
}
