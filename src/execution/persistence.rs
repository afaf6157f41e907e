use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use crate::data::types::RankedTrader;
use crate::execution::types::{
    BookedTrade, NewCopyTrade, Position, SignalStatus, Trade, TradeStatus, User,
};
use crate::strategies::types::{IdempotencyKey, Side, TradeSignal};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("trade {0} not found")]
    TradeNotFound(i64),

    #[error("illegal transition for trade {id}: {from} -> {to}")]
    IllegalTransition {
        id: i64,
        from: TradeStatus,
        to: TradeStatus,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Single source of truth for traders, signals, positions and trades.
pub struct CopyTradeDatabase {
    conn: Mutex<Connection>,
}

impl CopyTradeDatabase {
    pub fn new(db_path: &str) -> LedgerResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT UNIQUE NOT NULL,
                deposit_amount REAL NOT NULL DEFAULT 0,
                shares REAL NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );

            CREATE TABLE IF NOT EXISTS top_traders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT UNIQUE NOT NULL,
                total_pnl REAL NOT NULL,
                win_rate REAL NOT NULL,
                volume REAL NOT NULL DEFAULT 0,
                last_updated TIMESTAMP NOT NULL
            );

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_key TEXT UNIQUE NOT NULL,
                source_tx_hash TEXT NOT NULL,
                order_hash TEXT NOT NULL,
                trader_address TEXT NOT NULL,
                side TEXT NOT NULL,
                token_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                price TEXT,
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at TIMESTAMP NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id TEXT NOT NULL,
                token_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                amount REAL NOT NULL,
                avg_price REAL NOT NULL,
                current_price REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TIMESTAMP NOT NULL,
                closed_at TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL,
                trader_address TEXT NOT NULL,
                side TEXT NOT NULL,
                amount REAL NOT NULL,
                price REAL NOT NULL,
                tx_hash TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                idempotency_key TEXT UNIQUE NOT NULL,
                created_at TIMESTAMP NOT NULL,
                resolved_at TIMESTAMP,
                FOREIGN KEY(position_id) REFERENCES positions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
            CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);
            CREATE INDEX IF NOT EXISTS idx_top_traders_pnl ON top_traders(total_pnl);
            "#,
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    // ---- users ----

    pub fn create_user(&self, address: &str, deposit_amount: f64) -> LedgerResult<User> {
        let conn = self.conn()?;
        let now = Utc::now();
        // Shares are issued 1:1 against the deposit.
        let shares = deposit_amount;

        conn.execute(
            "INSERT INTO users (address, deposit_amount, shares, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![address.to_lowercase(), deposit_amount, shares, now.to_rfc3339()],
        )?;

        Ok(User {
            id: conn.last_insert_rowid(),
            address: address.to_lowercase(),
            deposit_amount,
            shares,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_user(&self, address: &str) -> LedgerResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, address, deposit_amount, shares, created_at, updated_at
                 FROM users WHERE address = ?1",
                params![address.to_lowercase()],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        address: row.get(1)?,
                        deposit_amount: row.get(2)?,
                        shares: row.get(3)?,
                        created_at: timestamp(row, 4)?,
                        updated_at: timestamp(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ---- tracked traders ----

    pub fn upsert_top_trader(&self, address: &str, pnl: f64, win_rate: f64, volume: f64) -> LedgerResult<()> {
        self.conn()?.execute(
            "INSERT INTO top_traders (address, total_pnl, win_rate, volume, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(address) DO UPDATE SET
                 total_pnl = excluded.total_pnl,
                 win_rate = excluded.win_rate,
                 volume = excluded.volume,
                 last_updated = excluded.last_updated",
            params![address.to_lowercase(), pnl, win_rate, volume, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Top-K tracked traders by recorded profit.
    pub fn get_top_traders(&self, limit: usize) -> LedgerResult<Vec<RankedTrader>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT address, total_pnl, win_rate, volume FROM top_traders
             ORDER BY total_pnl DESC LIMIT ?1",
        )?;

        let traders = stmt.query_map(params![limit as i64], |row| {
            Ok(RankedTrader {
                address: row.get(0)?,
                total_pnl: row.get(1)?,
                win_rate: row.get(2)?,
                volume: row.get(3)?,
            })
        })?;

        traders.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- signal outbox ----

    /// Returns false when the key was already in the outbox.
    pub fn enqueue_signal(&self, signal: &TradeSignal) -> LedgerResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO signals
                (idempotency_key, source_tx_hash, order_hash, trader_address, side, token_id,
                 amount, price, block_number, log_index, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                signal.key.to_string(),
                format!("{:#x}", signal.source_tx_hash),
                format!("{:#x}", signal.key.order_hash),
                format!("{:#x}", signal.trader),
                signal.side.as_str(),
                signal.token_id.to_string(),
                signal.amount.to_string(),
                signal.price.map(|p| p.to_string()),
                signal.block_number as i64,
                signal.log_index as i64,
                SignalStatus::Queued.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Oldest queued signals first.
    pub fn queued_signals(&self, limit: usize) -> LedgerResult<Vec<TradeSignal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_tx_hash, order_hash, trader_address, side, token_id, amount, price,
                    block_number, log_index
             FROM signals WHERE status = 'queued'
             ORDER BY id ASC LIMIT ?1",
        )?;

        let signals = stmt.query_map(params![limit as i64], |row| {
            let source_tx_hash: H256 = parsed(row, 0)?;
            let order_hash: H256 = parsed(row, 1)?;
            let price: Option<String> = row.get(6)?;
            let price = price
                .map(|p| U256::from_dec_str(&p).map_err(|e| conversion(6, e)))
                .transpose()?;
            Ok(TradeSignal {
                trader: parsed::<Address>(row, 2)?,
                side: parsed::<Side>(row, 3)?,
                token_id: decimal(row, 4)?,
                amount: decimal(row, 5)?,
                price,
                source_tx_hash,
                key: IdempotencyKey::new(source_tx_hash, order_hash),
                block_number: row.get::<_, i64>(7)? as u64,
                log_index: row.get::<_, i64>(8)? as u64,
            })
        })?;

        signals.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn signal_status(&self, key: &IdempotencyKey) -> LedgerResult<Option<String>> {
        let status = self
            .conn()?
            .query_row(
                "SELECT status FROM signals WHERE idempotency_key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    pub fn count_signals(&self, status: SignalStatus) -> LedgerResult<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM signals WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn mark_signal(&self, key: &IdempotencyKey, status: SignalStatus) -> LedgerResult<()> {
        self.conn()?.execute(
            "UPDATE signals SET status = ?1 WHERE idempotency_key = ?2",
            params![status.as_str(), key.to_string()],
        )?;
        Ok(())
    }

    // ---- positions & trades ----

    pub fn trade_exists(&self, idempotency_key: &str) -> LedgerResult<bool> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM trades WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Inserts the position and its pending trade, and marks the outbox row
    /// booked, in one transaction. `None` means the key was already booked.
    pub fn book_copy_trade(&self, new: &NewCopyTrade) -> LedgerResult<Option<BookedTrade>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Check if already booked
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM trades WHERE idempotency_key = ?1",
                params![new.idempotency_key],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }

        // Open position
        let pos = &new.position;
        tx.execute(
            "INSERT INTO positions (market_id, token_id, outcome, amount, avg_price, current_price, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pos.market_id,
                pos.token_id,
                pos.outcome,
                pos.amount,
                pos.avg_price,
                pos.current_price,
                pos.status.as_str(),
                pos.created_at.to_rfc3339(),
            ],
        )?;
        let position_id = tx.last_insert_rowid();

        // Record pending trade
        tx.execute(
            "INSERT INTO trades (position_id, trader_address, side, amount, price, status, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                position_id,
                new.trader_address,
                new.side.as_str(),
                new.amount,
                new.price,
                TradeStatus::Pending.as_str(),
                new.idempotency_key,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let trade_id = tx.last_insert_rowid();

        // Mark outbox signal as booked
        tx.execute(
            "UPDATE signals SET status = ?1 WHERE idempotency_key = ?2",
            params![SignalStatus::Booked.as_str(), new.idempotency_key],
        )?;

        tx.commit()?;
        Ok(Some(BookedTrade { position_id, trade_id }))
    }

    /// Moves a pending trade to a terminal status. Terminal trades never move.
    pub fn update_trade_status(&self, trade_id: i64, status: TradeStatus, tx_hash: Option<&str>) -> LedgerResult<()> {
        let conn = self.conn()?;

        let current: Option<String> = conn
            .query_row("SELECT status FROM trades WHERE id = ?1", params![trade_id], |row| row.get(0))
            .optional()?;
        let current = current.ok_or(LedgerError::TradeNotFound(trade_id))?;
        let current = TradeStatus::from_str(&current).unwrap_or(TradeStatus::Failed);

        if !current.can_transition_to(status) {
            return Err(LedgerError::IllegalTransition { id: trade_id, from: current, to: status });
        }

        // Only a pending row can resolve
        let updated = conn.execute(
            "UPDATE trades SET status = ?1, tx_hash = ?2, resolved_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status.as_str(), tx_hash, Utc::now().to_rfc3339(), trade_id],
        )?;
        if updated == 0 {
            return Err(LedgerError::IllegalTransition { id: trade_id, from: current, to: status });
        }
        Ok(())
    }

    pub fn get_trade(&self, trade_id: i64) -> LedgerResult<Option<Trade>> {
        self.query_trade("WHERE id = ?1", params![trade_id])
    }

    pub fn get_trade_by_key(&self, idempotency_key: &str) -> LedgerResult<Option<Trade>> {
        self.query_trade("WHERE idempotency_key = ?1", params![idempotency_key])
    }

    fn query_trade(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> LedgerResult<Option<Trade>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id, position_id, trader_address, side, amount, price, tx_hash, status,
                    idempotency_key, created_at, resolved_at
             FROM trades {}",
            filter
        );
        let trade = conn
            .query_row(&sql, args, |row| {
                Ok(Trade {
                    id: row.get(0)?,
                    position_id: row.get(1)?,
                    trader_address: row.get(2)?,
                    side: parsed(row, 3)?,
                    amount: row.get(4)?,
                    price: row.get(5)?,
                    tx_hash: row.get(6)?,
                    status: parsed(row, 7)?,
                    idempotency_key: row.get(8)?,
                    created_at: timestamp(row, 9)?,
                    resolved_at: optional_timestamp(row, 10)?,
                })
            })
            .optional()?;
        Ok(trade)
    }

    pub fn count_trades(&self, status: TradeStatus) -> LedgerResult<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM trades WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_positions(&self) -> LedgerResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_open_positions(&self) -> LedgerResult<Vec<Position>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, market_id, token_id, outcome, amount, avg_price, current_price, status, created_at, closed_at
             FROM positions
             WHERE status = 'open'
             ORDER BY id ASC",
        )?;

        let positions = stmt.query_map([], |row| {
            Ok(Position {
                id: Some(row.get(0)?),
                market_id: row.get(1)?,
                token_id: row.get(2)?,
                outcome: row.get(3)?,
                amount: row.get(4)?,
                avg_price: row.get(5)?,
                current_price: row.get(6)?,
                status: parsed(row, 7)?,
                created_at: timestamp(row, 8)?,
                closed_at: optional_timestamp(row, 9)?,
            })
        })?;

        positions.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::fmt::Display,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.to_string().into())
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion(idx, e))
}

fn decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<U256> {
    let raw: String = row.get(idx)?;
    U256::from_dec_str(&raw).map_err(|e| conversion(idx, e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

/// Startup report of state a previous run may have left behind.
pub async fn recover_from_crash(db: &CopyTradeDatabase) -> LedgerResult<()> {
    use tracing::{info, warn};

    info!("Performing crash recovery...");

    let open_positions = db.get_open_positions()?;
    info!("Found {} open positions", open_positions.len());
    for pos in &open_positions {
        info!(
            "Open position: market={}, outcome={}, token={}, amount={:.4} @ {:.6}",
            pos.market_id, pos.outcome, pos.token_id, pos.amount, pos.avg_price
        );
    }

    // A pending trade means the process stopped between booking and
    // resolution; the order may or may not have reached the chain.
    let pending = db.count_trades(TradeStatus::Pending)?;
    if pending > 0 {
        warn!("Found {} pending trades; reconcile them against the chain manually", pending);
    }

    let queued = db.count_signals(SignalStatus::Queued)?;
    info!("Found {} queued signals awaiting execution", queued);

    info!("Crash recovery complete");
    Ok(())
}
