//! SQLite persistence for account state and the trade ledger.
//!
//! Stores everything needed to resume after restart: the bankroll, the
//! open positions, and every closed trade. A trade close commits the
//! ledger update and the bankroll mutation in one transaction, so a
//! crash mid-cycle can never leave the two out of step.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Trade, TradeSide};

/// Database connection pool for the trade ledger.
pub struct Ledger {
    pool: SqlitePool,
}

/// Raw trade row. Decimal columns are stored as TEXT so values survive
/// a round trip without float drift.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    pub symbol: String,
    pub side: String,
    pub entry_price: String,
    pub exit_price: Option<String>,
    pub size_tokens: String,
    pub size_usd: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub pnl: Option<String>,
    pub order_id: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

impl Ledger {
    /// Open (creating if necessary) the ledger database.
    pub async fn new(database_url: &str) -> Result<Self> {
        // One connection: SQLite serializes writes, and an in-memory
        // database is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to ledger database")?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;

        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                bankroll TEXT NOT NULL,
                starting_bankroll TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                size_tokens TEXT NOT NULL,
                size_usd TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                pnl TEXT,
                order_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                opened_at TEXT NOT NULL,
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Initialize the account row or return the persisted state.
    /// Returns `(bankroll, starting_bankroll)`.
    pub async fn init_account(&self, starting: Decimal) -> Result<(Decimal, Decimal)> {
        sqlx::query(
            r#"
            INSERT INTO account (id, bankroll, starting_bankroll)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(starting.to_string())
        .bind(starting.to_string())
        .execute(&self.pool)
        .await?;

        let (bankroll, start): (String, String) =
            sqlx::query_as("SELECT bankroll, starting_bankroll FROM account WHERE id = 1")
                .fetch_one(&self.pool)
                .await
                .context("Account state not initialized")?;

        Ok((parse_decimal(&bankroll)?, parse_decimal(&start)?))
    }

    /// Record a newly opened trade.
    pub async fn insert_open_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, side, entry_price, size_tokens, size_usd,
                stop_loss, take_profit, order_id, status, opened_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'open', ?)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.size_tokens.to_string())
        .bind(trade.size_usd.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(&trade.order_id)
        .bind(trade.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record opened trade")?;

        Ok(())
    }

    /// Finalize a closed trade and move the bankroll in one transaction.
    pub async fn finalize_trade(&self, trade: &Trade, bankroll: Decimal) -> Result<()> {
        let exit_price = trade
            .exit_price
            .context("finalize_trade called on an open trade")?;
        let pnl = trade.pnl.context("finalize_trade called without pnl")?;
        let closed_at = trade.closed_at.unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE trades SET
                exit_price = ?,
                pnl = ?,
                status = 'closed',
                closed_at = ?
            WHERE symbol = ? AND status = 'open'
            "#,
        )
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(closed_at.to_rfc3339())
        .bind(&trade.symbol)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE account SET bankroll = ?, updated_at = datetime('now') WHERE id = 1")
            .bind(bankroll.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("Failed to commit trade close")?;

        Ok(())
    }

    /// All open positions, for restoring exposure on startup.
    pub async fn open_trades(&self) -> Result<Vec<Trade>> {
        let rows: Vec<StoredTrade> =
            sqlx::query_as("SELECT * FROM trades WHERE status = 'open' ORDER BY opened_at")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch open trades")?;

        rows.iter().map(to_trade).collect()
    }

    /// The closed-trade ledger, oldest first.
    pub async fn closed_trades(&self) -> Result<Vec<Trade>> {
        let rows: Vec<StoredTrade> =
            sqlx::query_as("SELECT * FROM trades WHERE status = 'closed' ORDER BY closed_at")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch closed trades")?;

        rows.iter().map(to_trade).collect()
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Bad decimal in ledger: '{raw}'"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Bad timestamp in ledger: '{raw}'"))
}

fn to_trade(row: &StoredTrade) -> Result<Trade> {
    let side = TradeSide::parse(&row.side)
        .with_context(|| format!("Bad trade side in ledger: '{}'", row.side))?;

    Ok(Trade {
        symbol: row.symbol.clone(),
        side,
        entry_price: parse_decimal(&row.entry_price)?,
        exit_price: row.exit_price.as_deref().map(parse_decimal).transpose()?,
        size_tokens: parse_decimal(&row.size_tokens)?,
        size_usd: parse_decimal(&row.size_usd)?,
        stop_loss: parse_decimal(&row.stop_loss)?,
        take_profit: parse_decimal(&row.take_profit)?,
        pnl: row.pnl.as_deref().map(parse_decimal).transpose()?,
        order_id: row.order_id.clone(),
        opened_at: parse_timestamp(&row.opened_at)?,
        closed_at: row.closed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn memory_ledger() -> Ledger {
        Ledger::new("sqlite::memory:").await.unwrap()
    }

    fn sample_trade() -> Trade {
        Trade::open(
            "BTCUSDT".to_string(),
            TradeSide::Buy,
            dec!(95000),
            dec!(0.000389),
            dec!(37),
            dec!(93100),
            dec!(98800),
            "order-1".to_string(),
        )
    }

    #[tokio::test]
    async fn account_state_survives_reinit() {
        let ledger = memory_ledger().await;

        let (bankroll, start) = ledger.init_account(dec!(1850)).await.unwrap();
        assert_eq!(bankroll, dec!(1850));
        assert_eq!(start, dec!(1850));

        // A second init with a different figure keeps the stored state
        let (bankroll, start) = ledger.init_account(dec!(9999)).await.unwrap();
        assert_eq!(bankroll, dec!(1850));
        assert_eq!(start, dec!(1850));
    }

    #[tokio::test]
    async fn open_close_round_trip() {
        let ledger = memory_ledger().await;
        ledger.init_account(dec!(1850)).await.unwrap();

        let mut trade = sample_trade();
        ledger.insert_open_trade(&trade).await.unwrap();

        let open = ledger.open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "BTCUSDT");
        assert_eq!(open[0].entry_price, dec!(95000));
        assert!(open[0].is_open());

        let pnl = trade.close(dec!(98800));
        ledger
            .finalize_trade(&trade, dec!(1850) + pnl)
            .await
            .unwrap();

        assert!(ledger.open_trades().await.unwrap().is_empty());

        let closed = ledger.closed_trades().await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].pnl, Some(pnl));

        // Bankroll moved in the same transaction
        let (bankroll, _) = ledger.init_account(dec!(1850)).await.unwrap();
        assert_eq!(bankroll, dec!(1850) + pnl);
    }

    #[tokio::test]
    async fn finalize_rejects_open_trade() {
        let ledger = memory_ledger().await;
        ledger.init_account(dec!(1850)).await.unwrap();

        let trade = sample_trade();
        assert!(ledger.finalize_trade(&trade, dec!(1850)).await.is_err());
    }
}
