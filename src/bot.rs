//! Bot runner: the polling loop tying tracker, engine and notifications together.
//!
//! Each tick:
//! - Polls every enabled wallet and diffs against its last snapshot
//! - Feeds the resulting events through the follow engine one at a time
//! - Sweeps mirrored positions for stop-loss breaches

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{ExecutionVenue, SnapshotSource};
use crate::db::Database;
use crate::notify::{
    format_event, format_follow_result, format_shutdown, format_startup, format_stop_loss,
    Notifier,
};
use crate::tracker::WalletTracker;
use crate::trading::{FollowConfig, FollowDecision, FollowEngine, OrderExecutor};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Wallet polling interval (seconds)
    pub poll_interval_secs: u64,

    /// Fill orders on a paper ledger instead of the live venue
    pub dry_run: bool,

    /// Starting cash of the paper ledger in dry-run mode (USD)
    pub paper_balance: Decimal,

    /// Follow configuration
    pub follow: FollowConfig,

    /// Database URL
    pub database_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            dry_run: true,
            paper_balance: dec!(10000),
            follow: FollowConfig::default(),
            database_url: "sqlite:./hypertrack.db?mode=rwc".to_string(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub events: usize,
    pub follows: usize,
    pub errors: usize,
    pub stop_losses: usize,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Arc<Database>,
    tracker: WalletTracker,
    engine: FollowEngine,
    notifier: Arc<dyn Notifier>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        db: Arc<Database>,
        source: Arc<dyn SnapshotSource>,
        venue: Arc<dyn ExecutionVenue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = Arc::new(OrderExecutor::new(
            venue,
            config.follow.retry,
            config.follow.max_slippage,
        ));
        let engine = FollowEngine::new(db.clone(), executor, config.follow.clone());
        let tracker = WalletTracker::new(source, db.clone());

        Self {
            config,
            db,
            tracker,
            engine,
            notifier,
        }
    }

    /// Stop flag for external control. The loop exits before its next tick.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.tracker.shutdown_signal()
    }

    /// Main run loop.
    pub async fn run(&self) -> Result<()> {
        let wallets = self.db.list_wallets(true).await?;
        let mirrored = self.db.list_mirrored_positions().await?;
        info!(
            dry_run = self.config.dry_run,
            paper_balance = %self.config.paper_balance,
            database = %self.config.database_url,
            poll_interval = self.config.poll_interval_secs,
            wallets = wallets.len(),
            mirrored = mirrored.len(),
            "Starting bot run loop"
        );
        if wallets.is_empty() {
            warn!("No enabled wallets, add one with `hypertrack add <address>`");
        }
        self.notifier
            .send(&format_startup(self.config.dry_run, wallets.len(), mirrored.len()))
            .await;

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Register shutdown handler
        let shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.tracker.is_stopped() {
            poll_interval.tick().await;
            if self.tracker.is_stopped() {
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in bot tick");
            }
        }

        info!("Bot stopped");
        self.notifier.send(&format_shutdown()).await;
        Ok(())
    }

    /// Single iteration of the main loop.
    pub async fn tick(&self) -> Result<TickSummary> {
        debug!("Bot tick");
        let mut summary = TickSummary::default();

        // 1. Poll wallets
        let report = self.tracker.poll_cycle().await?;
        summary.events = report.events.len();

        // 2. Follow each event to completion, in order
        for event in &report.events {
            self.notifier.send(&format_event(event)).await;

            let result = self.engine.on_wallet_event(event).await;
            match result.decision {
                FollowDecision::Follow => summary.follows += 1,
                FollowDecision::Error => summary.errors += 1,
                FollowDecision::Skip | FollowDecision::Reject => {}
            }

            if let Some(message) = format_follow_result(&result) {
                self.notifier.send(&message).await;
            }
        }

        // 3. Stop-loss sweep
        match self.engine.check_stop_losses().await {
            Ok(hits) => {
                summary.stop_losses = hits.len();
                for hit in &hits {
                    self.notifier.send(&format_stop_loss(hit)).await;
                }
            }
            Err(e) => warn!(error = %e, "Stop-loss sweep failed"),
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{FakeSnapshots, FakeVenue};
    use crate::api::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ALICE: &str = "0xaaaa000000000000000000000000000000000001";

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    async fn bot(snapshots: FakeSnapshots) -> (Bot, Arc<FakeVenue>, Arc<RecordingNotifier>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.add_wallet(ALICE, None, None, None).await.unwrap();

        let venue = Arc::new(
            FakeVenue::new()
                .with_balance(dec!(10000))
                .with_price("ETH", dec!(2500)),
        );
        let notifier = Arc::new(RecordingNotifier::default());

        let mut config = BotConfig::default();
        config.follow.retry = RetryPolicy {
            max_attempts: 2,
            delay: Duration::ZERO,
        };

        let bot = Bot::new(
            config,
            db,
            Arc::new(snapshots),
            venue.clone(),
            notifier.clone(),
        );
        (bot, venue, notifier)
    }

    #[tokio::test]
    async fn test_ticks_follow_open_and_close() {
        let snapshots = FakeSnapshots::new();
        snapshots.script(
            ALICE,
            vec![Some(vec![]), Some(vec![("ETH", dec!(2))]), Some(vec![])],
        );
        let (bot, venue, notifier) = bot(snapshots).await;

        // Baseline only
        assert_eq!(bot.tick().await.unwrap(), TickSummary::default());

        let open = bot.tick().await.unwrap();
        assert_eq!(open.events, 1);
        assert_eq!(open.follows, 1);
        assert_eq!(venue.open_positions().len(), 1);

        let close = bot.tick().await.unwrap();
        assert_eq!(close.follows, 1);
        assert!(venue.open_positions().is_empty());

        // Event and result for each of the two follows
        let messages = notifier.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].contains("OPEN"));
        assert!(messages[3].contains("Followed CLOSE"));
    }

    #[tokio::test]
    async fn test_failed_order_is_counted_and_announced() {
        let snapshots = FakeSnapshots::new();
        snapshots.script(ALICE, vec![Some(vec![]), Some(vec![("ETH", dec!(-1))])]);
        let (bot, venue, notifier) = bot(snapshots).await;
        venue.reject_orders();

        bot.tick().await.unwrap();
        let summary = bot.tick().await.unwrap();
        assert_eq!(summary.errors, 1);
        assert!(notifier.messages().iter().any(|m| m.contains("Reason:")));
    }

    #[tokio::test]
    async fn test_run_exits_when_stopped() {
        let (bot, _, notifier) = bot(FakeSnapshots::new()).await;
        bot.shutdown_signal().store(true, Ordering::SeqCst);

        bot.run().await.unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("started"));
        assert!(messages[0].contains("1 wallet(s)"));
        assert!(messages[1].contains("stopped"));
    }
}
