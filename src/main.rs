//! HyperTrack
//!
//! Watches Hyperliquid wallets and mirrors their position changes on Lighter.

mod api;
mod bot;
mod db;
mod models;
mod notify;
mod tracker;
mod trading;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{
    env_flag, ExecutionVenue, HyperliquidClient, LighterClient, LighterConfig, PaperVenue,
    RetryPolicy,
};
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::models::{is_valid_address, short_address};
use crate::notify::{format_close_all, LogNotifier, Notifier, TelegramNotifier};
use crate::trading::{DecreaseMode, FollowConfig, FollowEngine, OrderExecutor, RatioMode};

/// Hyperliquid to Lighter copy-trading bot CLI.
#[derive(Parser)]
#[command(name = "hypertrack")]
#[command(about = "Mirror Hyperliquid wallet positions on Lighter", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, env = "HYPERTRACK_DATABASE", default_value = "sqlite:./hypertrack.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "HYPERTRACK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start following tracked wallets
    Run {
        /// Polling interval in seconds
        #[arg(short, long, default_value = "2")]
        interval: u64,

        /// Fill orders on a paper ledger at live mid prices
        #[arg(long)]
        dry_run: bool,

        /// Starting paper balance in USD (dry run only)
        #[arg(long, default_value = "10000")]
        paper_balance: Decimal,

        /// Share of balance per opening follow, or "source" to use the wallet's own exposure
        #[arg(short, long, default_value = "0.1")]
        ratio: String,

        /// DECREASE sizing: half or proportional
        #[arg(long, default_value = "half")]
        decrease_mode: String,

        /// Default notional cap per follow (USD)
        #[arg(long, default_value = "1000")]
        max_position: Decimal,

        /// Default stop-loss ratio (0.0 to 1.0)
        #[arg(long, default_value = "0.5")]
        stop_loss: Decimal,

        /// Market order slippage cap (0.0 to 1.0)
        #[arg(long, default_value = "0.01")]
        slippage: Decimal,
    },

    /// Add a wallet to track
    Add {
        /// Hyperliquid wallet address
        address: String,

        /// Notional cap override (USD)
        #[arg(long)]
        max_position: Option<Decimal>,

        /// Stop-loss ratio override (0.0 to 1.0)
        #[arg(long)]
        stop_loss: Option<Decimal>,

        /// Display label
        #[arg(short, long)]
        nickname: Option<String>,
    },

    /// Stop tracking a wallet
    Remove {
        address: String,
    },

    /// Resume following a wallet
    Enable {
        address: String,
    },

    /// Keep a wallet tracked but ignore its events
    Disable {
        address: String,
    },

    /// List tracked wallets
    List,

    /// Show mirrored positions and their lock holders
    Positions {
        /// Also fetch positions from the Lighter account
        #[arg(long)]
        venue: bool,
    },

    /// Close every position on the Lighter account
    CloseAll,

    /// Show recent follow trades
    History {
        /// Only this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize database
    let db = Arc::new(Database::new(&cli.database).await?);

    match cli.command {
        Commands::Run {
            interval,
            dry_run,
            paper_balance,
            ratio,
            decrease_mode,
            max_position,
            stop_loss,
            slippage,
        } => {
            let ratio_mode = RatioMode::parse(&ratio)
                .with_context(|| format!("Invalid ratio '{}': use a fraction in (0, 1] or 'source'", ratio))?;
            let decrease_mode = DecreaseMode::parse(&decrease_mode)
                .with_context(|| format!("Invalid decrease mode '{}'", decrease_mode))?;
            check_ratio("stop-loss", stop_loss)?;
            check_ratio("slippage", slippage)?;

            let wallets = db.list_wallets(true).await?;
            if wallets.is_empty() {
                println!("No wallets being followed. Use 'hypertrack add <address>' first.");
                return Ok(());
            }

            let bot_config = BotConfig {
                poll_interval_secs: interval,
                dry_run,
                paper_balance,
                follow: FollowConfig {
                    ratio_mode,
                    default_max_position_usd: max_position,
                    default_stop_loss_ratio: stop_loss,
                    decrease_mode,
                    max_slippage: slippage,
                    ..Default::default()
                },
                database_url: cli.database.clone(),
            };

            let source = Arc::new(HyperliquidClient::new(env_flag("HYPERLIQUID_TESTNET", false))?);
            let venue = build_venue(dry_run, paper_balance)?;
            let notifier = build_notifier()?;

            println!("\n=== HyperTrack ===");
            println!("Polling interval: {}s", interval);
            println!("Mode: {}", if dry_run { "DRY RUN (paper fills)" } else { "LIVE TRADING" });
            println!("Followed wallets: {}", wallets.len());
            println!("\nPress Ctrl+C to stop.\n");

            let bot = Bot::new(bot_config, db.clone(), source, venue, notifier);
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Add {
            address,
            max_position,
            stop_loss,
            nickname,
        } => {
            if !is_valid_address(&address) {
                bail!("Invalid wallet address: {}", address);
            }
            if let Some(ratio) = stop_loss {
                check_ratio("stop-loss", ratio)?;
            }

            let wallet = db
                .add_wallet(&address, max_position, stop_loss, nickname.as_deref())
                .await?;
            println!("Now tracking: {} ({})", wallet.address, wallet.display_name());
        }

        Commands::Remove { address } => {
            if db.remove_wallet(&address).await? {
                println!("Stopped tracking: {}", address);
            } else {
                println!("Wallet not tracked: {}", address);
            }
        }

        Commands::Enable { address } => {
            set_enabled(&db, &address, true).await?;
        }

        Commands::Disable { address } => {
            set_enabled(&db, &address, false).await?;
        }

        Commands::List => {
            let wallets = db.list_wallets(false).await?;

            if wallets.is_empty() {
                println!("No wallets being tracked. Use 'hypertrack add <address>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<44} {:<16} {:>8} {:>10} {:>8}",
                "ADDRESS", "NAME", "ENABLED", "MAX USD", "STOP"
            );
            println!("{}", "-".repeat(90));

            for wallet in wallets {
                println!(
                    "{:<44} {:<16} {:>8} {:>10} {:>8}",
                    wallet.address,
                    truncate(&wallet.display_name(), 14),
                    if wallet.enabled { "yes" } else { "no" },
                    or_default(wallet.max_position_usd),
                    or_default(wallet.stop_loss_ratio),
                );
            }
        }

        Commands::Positions { venue } => {
            let positions = db.list_mirrored_positions().await?;

            if positions.is_empty() {
                println!("No mirrored positions.");
            } else {
                println!(
                    "\n{:<8} {:<6} {:>14} {:>14} {:<16}",
                    "SYMBOL", "SIDE", "SIZE", "ENTRY", "HOLDER"
                );
                println!("{}", "-".repeat(62));
                for p in positions {
                    println!(
                        "{:<8} {:<6} {:>14} {:>14} {:<16}",
                        p.symbol,
                        p.side,
                        if p.is_pending() { "pending".to_string() } else { p.size.to_string() },
                        p.entry_price.round_dp(4),
                        short_address(&p.source_wallet),
                    );
                }
            }

            if venue {
                let client = LighterClient::new(&LighterConfig::from_env()?)?;
                let venue_positions = client.positions().await?;

                println!("\n--- Lighter positions ({}) ---", venue_positions.len());
                for p in venue_positions {
                    println!(
                        "  {} {} {} @ {} (P&L: ${:.2})",
                        p.symbol, p.side, p.size, p.entry_price, p.unrealized_pnl
                    );
                }
            }
        }

        Commands::CloseAll => {
            let venue: Arc<dyn ExecutionVenue> =
                Arc::new(LighterClient::new(&LighterConfig::from_env()?)?);
            let config = FollowConfig::default();
            let executor = Arc::new(OrderExecutor::new(venue, config.retry, config.max_slippage));
            let engine = FollowEngine::new(db.clone(), executor, config);

            info!("Closing all positions");
            let results = engine.close_all().await?;

            let message = format_close_all(&results);
            build_notifier()?.send(&message).await;
            println!("{}", message.replace('*', ""));
        }

        Commands::History { symbol, limit } => {
            let trades = db.recent_trades(symbol.as_deref(), limit).await?;

            if trades.is_empty() {
                println!("No trades recorded.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<8} {:<9} {:<5} {:>12} {:>12} {:<16}",
                "TIME", "SYMBOL", "KIND", "SIDE", "SIZE", "PRICE", "SOURCE"
            );
            println!("{}", "-".repeat(88));
            for t in trades {
                println!(
                    "{:<20} {:<8} {:<9} {:<5} {:>12} {:>12} {:<16}",
                    t.created_at.format("%Y-%m-%d %H:%M:%S"),
                    t.symbol,
                    t.kind,
                    t.side,
                    t.size,
                    t.price.round_dp(4),
                    short_address(&t.source_wallet),
                );
            }
        }

        Commands::Config => {
            let config = BotConfig::default();
            let follow = &config.follow;
            let retry = RetryPolicy::default();

            println!("\n=== Follow Configuration ===\n");
            println!("Sizing:");
            match follow.ratio_mode {
                RatioMode::Fixed(ratio) => {
                    println!("  Position Ratio:       {}% of balance", ratio * dec!(100))
                }
                RatioMode::SourceExposure => println!("  Position Ratio:       source exposure"),
            }
            println!("  Max Position:         ${}", follow.default_max_position_usd);
            println!("  Decrease Mode:        {:?}", follow.decrease_mode);
            println!("  Balance Cache:        {}s", follow.balance_ttl.as_secs());

            println!("\nRisk:");
            println!("  Stop Loss:            {}%", follow.default_stop_loss_ratio * dec!(100));
            println!("  Max Slippage:         {}%", follow.max_slippage * dec!(100));

            println!("\nExecution:");
            println!("  Retry Attempts:       {}", retry.max_attempts);
            println!("  Retry Delay:          {}s", retry.delay.as_secs());
            println!("  Poll Interval:        {}s", config.poll_interval_secs);

            println!("\nEnvironment:");
            println!("  Hyperliquid Testnet:  {}", env_flag("HYPERLIQUID_TESTNET", false));
            println!("  Lighter Testnet:      {}", env_flag("LIGHTER_TESTNET", true));
            println!(
                "  Lighter Credentials:  {}",
                if LighterConfig::from_env().is_ok() { "configured" } else { "missing" }
            );
            println!(
                "  Telegram:             {}",
                if TelegramNotifier::from_env()?.is_some() { "configured" } else { "log only" }
            );
        }
    }

    Ok(())
}

/// Live Lighter client, or a paper ledger quoting from Lighter's public book.
fn build_venue(dry_run: bool, paper_balance: Decimal) -> Result<Arc<dyn ExecutionVenue>> {
    if dry_run {
        let quotes = LighterClient::quotes_only(env_flag("LIGHTER_TESTNET", true))?;
        let paper: Arc<dyn ExecutionVenue> = Arc::new(PaperVenue::new(Arc::new(quotes), paper_balance));
        return Ok(paper);
    }

    let config = LighterConfig::from_env()?;
    info!(testnet = config.testnet, "Lighter client initialized");
    let live: Arc<dyn ExecutionVenue> = Arc::new(LighterClient::new(&config)?);
    Ok(live)
}

fn build_notifier() -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_env()? {
        Some(telegram) => Arc::new(telegram),
        None => Arc::new(LogNotifier),
    };
    Ok(notifier)
}

async fn set_enabled(db: &Database, address: &str, enabled: bool) -> Result<()> {
    if db.set_wallet_enabled(address, enabled).await? {
        println!("{} {}", if enabled { "Enabled" } else { "Disabled" }, address);
    } else {
        println!("Wallet not tracked: {}", address);
    }
    Ok(())
}

fn check_ratio(name: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        bail!("{} must be in (0, 1], got {}", name, value);
    }
    Ok(())
}

fn or_default(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "default".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
