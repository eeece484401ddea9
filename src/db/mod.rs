//! Database persistence for tracked wallets, symbol locks, and trade history.
//!
//! The `mirrored_positions` table is keyed by symbol, so the symbol lock is
//! enforced by SQLite itself:
//! - claims use `INSERT ... ON CONFLICT DO NOTHING`
//! - updates only apply when the caller already holds the lock
//!
//! Decimals are stored as TEXT to keep them exact.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, info};

use crate::models::{
    EventKind, MirroredPosition, OrderSide, Side, TrackedWalletConfig, TradeRecord,
};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored wallet record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredWallet {
    address: String,
    enabled: bool,
    max_position_usd: Option<String>,
    stop_loss_ratio: Option<String>,
    nickname: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Stored mirrored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredMirroredPosition {
    symbol: String,
    side: String,
    size: String,
    entry_price: String,
    source_wallet: String,
    opened_at: String,
    updated_at: String,
}

/// Stored trade history record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: String,
    symbol: String,
    side: String,
    size: String,
    price: String,
    trade_type: String,
    source_wallet: String,
    order_id: Option<String>,
    created_at: String,
}

/// Result of trying to take the lock on a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// A new pending claim was created for the caller
    Claimed,
    /// The caller already held the lock
    AlreadyHeld,
    /// Another wallet holds the lock
    HeldBy(String),
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run a raw statement against the pool.
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                max_position_usd TEXT,
                stop_loss_ratio TEXT,
                nickname TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per symbol: the primary key is the symbol lock
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mirrored_positions (
                symbol TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                source_wallet TEXT NOT NULL,
                opened_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                price TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                source_wallet TEXT NOT NULL,
                order_id TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_mirrored_positions_wallet ON mirrored_positions(source_wallet)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_history_symbol ON trade_history(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Wallets ====================

    /// Add a wallet to track. Fails if it is already tracked.
    pub async fn add_wallet(
        &self,
        address: &str,
        max_position_usd: Option<Decimal>,
        stop_loss_ratio: Option<Decimal>,
        nickname: Option<&str>,
    ) -> Result<TrackedWalletConfig> {
        let address = address.to_lowercase();

        let result = sqlx::query(
            r#"
            INSERT INTO wallets (address, max_position_usd, stop_loss_ratio, nickname, created_at, updated_at)
            VALUES (?, ?, ?, ?, datetime('now'), datetime('now'))
            "#,
        )
        .bind(&address)
        .bind(max_position_usd.map(|d| d.to_string()))
        .bind(stop_loss_ratio.map(|d| d.to_string()))
        .bind(nickname)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                bail!("Wallet already tracked: {}", address);
            }
            Err(e) => return Err(e).context("Failed to add wallet"),
        }

        info!(address = %address, "Wallet added");

        self.get_wallet_config(&address)
            .await?
            .context("Wallet missing after insert")
    }

    /// Delete a tracked wallet. Returns whether it existed.
    pub async fn remove_wallet(&self, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wallets WHERE address = ?")
            .bind(address.to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable a wallet. Returns whether it existed.
    pub async fn set_wallet_enabled(&self, address: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE wallets SET enabled = ?, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(enabled)
        .bind(address.to_lowercase())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get one wallet's configuration.
    pub async fn get_wallet_config(&self, address: &str) -> Result<Option<TrackedWalletConfig>> {
        let row = sqlx::query_as::<_, StoredWallet>("SELECT * FROM wallets WHERE address = ?")
            .bind(address.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        row.map(TryInto::try_into).transpose()
    }

    /// List wallets in creation order.
    pub async fn list_wallets(&self, enabled_only: bool) -> Result<Vec<TrackedWalletConfig>> {
        let sql = if enabled_only {
            "SELECT * FROM wallets WHERE enabled = 1 ORDER BY created_at, address"
        } else {
            "SELECT * FROM wallets ORDER BY created_at, address"
        };

        let rows = sqlx::query_as::<_, StoredWallet>(sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list wallets")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    // ==================== Mirrored Positions ====================

    /// Get the mirrored position (and lock holder) for a symbol.
    pub async fn get_mirrored_position(&self, symbol: &str) -> Result<Option<MirroredPosition>> {
        let row = sqlx::query_as::<_, StoredMirroredPosition>(
            "SELECT * FROM mirrored_positions WHERE symbol = ?",
        )
        .bind(symbol.to_uppercase())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch mirrored position")?;

        row.map(TryInto::try_into).transpose()
    }

    /// All mirrored positions, including pending claims.
    pub async fn list_mirrored_positions(&self) -> Result<Vec<MirroredPosition>> {
        let rows = sqlx::query_as::<_, StoredMirroredPosition>(
            "SELECT * FROM mirrored_positions ORDER BY opened_at, symbol",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list mirrored positions")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Take the lock on a symbol for `source_wallet`.
    ///
    /// A fresh lock is recorded as a zero-size claim on `side`. The insert is a
    /// single statement, so two wallets racing for the same symbol cannot both win.
    pub async fn acquire_symbol_lock(
        &self,
        symbol: &str,
        side: Side,
        source_wallet: &str,
    ) -> Result<LockAcquisition> {
        let symbol = symbol.to_uppercase();
        let wallet = source_wallet.to_lowercase();

        // The holder may release between our insert and read; try again then
        for _ in 0..3 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO mirrored_positions (symbol, side, size, entry_price, source_wallet, opened_at, updated_at)
                VALUES (?, ?, '0', '0', ?, datetime('now'), datetime('now'))
                ON CONFLICT(symbol) DO NOTHING
                "#,
            )
            .bind(&symbol)
            .bind(side.as_str())
            .bind(&wallet)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                debug!(symbol = %symbol, wallet = %wallet, "Symbol lock claimed");
                return Ok(LockAcquisition::Claimed);
            }

            match self.get_mirrored_position(&symbol).await? {
                Some(existing) if existing.is_held_by(&wallet) => {
                    return Ok(LockAcquisition::AlreadyHeld)
                }
                Some(existing) => return Ok(LockAcquisition::HeldBy(existing.source_wallet)),
                None => continue,
            }
        }

        bail!("Symbol lock for {} kept changing hands", symbol)
    }

    /// Drop a zero-size claim left by an order that never filled.
    pub async fn release_pending_claim(&self, symbol: &str, source_wallet: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM mirrored_positions
            WHERE symbol = ? AND source_wallet = ? AND CAST(size AS REAL) = 0
            "#,
        )
        .bind(symbol.to_uppercase())
        .bind(source_wallet.to_lowercase())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert or update the mirrored position for a symbol.
    ///
    /// Returns false without writing when another wallet holds the symbol.
    pub async fn upsert_mirrored_position(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        source_wallet: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO mirrored_positions (symbol, side, size, entry_price, source_wallet, opened_at, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'), datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                side = excluded.side,
                size = excluded.size,
                entry_price = excluded.entry_price,
                updated_at = datetime('now')
            WHERE mirrored_positions.source_wallet = excluded.source_wallet
            "#,
        )
        .bind(symbol.to_uppercase())
        .bind(side.as_str())
        .bind(size.to_string())
        .bind(entry_price.to_string())
        .bind(source_wallet.to_lowercase())
        .execute(&self.pool)
        .await
        .context("Failed to upsert mirrored position")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete the mirrored position, releasing the symbol lock.
    pub async fn delete_mirrored_position(&self, symbol: &str, source_wallet: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM mirrored_positions WHERE symbol = ? AND source_wallet = ?")
                .bind(symbol.to_uppercase())
                .bind(source_wallet.to_lowercase())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Trade History ====================

    /// Record an executed follow.
    pub async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_history (id, symbol, side, size, price, trade_type, source_wallet, order_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
            "#,
        )
        .bind(&trade.id)
        .bind(trade.symbol.to_uppercase())
        .bind(trade.side.as_str())
        .bind(trade.size.to_string())
        .bind(trade.price.to_string())
        .bind(trade.kind.as_str())
        .bind(trade.source_wallet.to_lowercase())
        .bind(&trade.order_id)
        .execute(&self.pool)
        .await
        .context("Failed to record trade")?;

        Ok(())
    }

    /// Most recent trades, optionally for one symbol.
    pub async fn recent_trades(&self, symbol: Option<&str>, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = match symbol {
            Some(s) => {
                sqlx::query_as::<_, StoredTrade>(
                    "SELECT * FROM trade_history WHERE symbol = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(s.to_uppercase())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, StoredTrade>(
                    "SELECT * FROM trade_history ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to fetch trade history")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in {}: {}", field, value))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .with_context(|| format!("Invalid timestamp: {}", value))
}

impl TryFrom<StoredWallet> for TrackedWalletConfig {
    type Error = anyhow::Error;

    fn try_from(row: StoredWallet) -> Result<Self> {
        Ok(Self {
            max_position_usd: row
                .max_position_usd
                .as_deref()
                .map(|v| parse_decimal("max_position_usd", v))
                .transpose()?,
            stop_loss_ratio: row
                .stop_loss_ratio
                .as_deref()
                .map(|v| parse_decimal("stop_loss_ratio", v))
                .transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            address: row.address,
            enabled: row.enabled,
            nickname: row.nickname,
        })
    }
}

impl TryFrom<StoredMirroredPosition> for MirroredPosition {
    type Error = anyhow::Error;

    fn try_from(row: StoredMirroredPosition) -> Result<Self> {
        Ok(Self {
            side: Side::parse(&row.side)
                .with_context(|| format!("Invalid side for {}: {}", row.symbol, row.side))?,
            size: parse_decimal("size", &row.size)?,
            entry_price: parse_decimal("entry_price", &row.entry_price)?,
            opened_at: parse_timestamp(&row.opened_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            symbol: row.symbol,
            source_wallet: row.source_wallet,
        })
    }
}

impl TryFrom<StoredTrade> for TradeRecord {
    type Error = anyhow::Error;

    fn try_from(row: StoredTrade) -> Result<Self> {
        let side = match row.side.as_str() {
            "BUY" => OrderSide::Buy,
            "SELL" => OrderSide::Sell,
            other => bail!("Invalid order side in trade {}: {}", row.id, other),
        };
        let kind = match row.trade_type.as_str() {
            "OPEN" => EventKind::Open,
            "CLOSE" => EventKind::Close,
            "INCREASE" => EventKind::Increase,
            "DECREASE" => EventKind::Decrease,
            "FLIP" => EventKind::Flip,
            _ => EventKind::Unknown,
        };

        Ok(Self {
            side,
            kind,
            size: parse_decimal("size", &row.size)?,
            price: parse_decimal("price", &row.price)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            symbol: row.symbol,
            source_wallet: row.source_wallet,
            order_id: row.order_id,
        })
    }
}
