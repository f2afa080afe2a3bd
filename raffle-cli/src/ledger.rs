use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raffle_core::{ParticipantId, PayoutSink, RaffleError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Account holding the pooled entry fees between entry and payout.
pub const POT_ACCOUNT: &str = "raffle-pot";

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Insufficient funds in '{account}': need {need}, have {available}")]
    InsufficientFunds {
        account: String,
        need: u64,
        available: u64,
    },

    #[error("Account '{0}' does not accept transfers")]
    AccountBlocked(String),

    #[error("Amount out of range: {0}")]
    InvalidAmount(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: u64,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub memo: String,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed balances for raffle participants and the pot.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL,
                blocked INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_account TEXT NOT NULL,
                to_account TEXT NOT NULL,
                amount INTEGER NOT NULL,
                memo TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Credit an account from outside the ledger. Returns the new balance.
    pub async fn deposit(&self, account: &str, amount: u64) -> Result<u64> {
        let delta = to_sql_amount(amount)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        ensure_account(&tx, account)?;
        let (balance, _) = load_account(&tx, account)?;
        let new_balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount(amount))?;
        to_sql_amount(new_balance)?;

        tx.execute(
            "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2",
            params![delta, account],
        )?;
        tx.commit()?;

        tracing::debug!("Deposited {} into '{}'", amount, account);
        Ok(new_balance)
    }

    pub async fn balance(&self, account: &str) -> Result<u64> {
        let conn = self.conn.lock().await;

        let balance: Option<i64> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                params![account],
                |row| row.get(0),
            )
            .optional()?;

        Ok(balance.unwrap_or(0) as u64)
    }

    pub async fn set_blocked(&self, account: &str, blocked: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        ensure_account(&conn, account)?;
        conn.execute(
            "UPDATE accounts SET blocked = ?1 WHERE id = ?2",
            params![blocked, account],
        )?;

        tracing::info!(
            "Account '{}' {}",
            account,
            if blocked { "blocked" } else { "unblocked" }
        );
        Ok(())
    }

    /// Move funds between two accounts in one SQLite transaction.
    pub async fn transfer(&self, from: &str, to: &str, amount: u64, memo: &str) -> Result<()> {
        let delta = to_sql_amount(amount)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        ensure_account(&tx, from)?;
        ensure_account(&tx, to)?;

        let (_, to_blocked) = load_account(&tx, to)?;
        if to_blocked {
            return Err(LedgerError::AccountBlocked(to.to_string()));
        }

        let (available, _) = load_account(&tx, from)?;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: from.to_string(),
                need: amount,
                available,
            });
        }

        tx.execute(
            "UPDATE accounts SET balance = balance - ?1 WHERE id = ?2",
            params![delta, from],
        )?;
        tx.execute(
            "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2",
            params![delta, to],
        )?;
        tx.execute(
            "INSERT INTO transfers (from_account, to_account, amount, memo, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![from, to, delta, memo, Utc::now().timestamp()],
        )?;
        tx.commit()?;

        tracing::debug!("Transferred {} from '{}' to '{}' ({})", amount, from, to, memo);
        Ok(())
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, balance, blocked, created_at FROM accounts ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Account {
                id: row.get(0)?,
                balance: row.get::<_, i64>(1)? as u64,
                blocked: row.get(2)?,
                created_at: DateTime::from_timestamp(row.get(3)?, 0).unwrap_or_else(Utc::now),
            })
        })?;

        let mut accounts = Vec::new();
        for account in rows {
            accounts.push(account?);
        }

        Ok(accounts)
    }

    /// Most recent transfers first.
    pub async fn transfers(&self, limit: usize) -> Result<Vec<TransferRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, from_account, to_account, amount, memo, timestamp
             FROM transfers ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(TransferRecord {
                id: row.get(0)?,
                from: row.get(1)?,
                to: row.get(2)?,
                amount: row.get::<_, i64>(3)? as u64,
                memo: row.get(4)?,
                timestamp: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_else(Utc::now),
            })
        })?;

        let mut transfers = Vec::new();
        for transfer in rows {
            transfers.push(transfer?);
        }

        Ok(transfers)
    }
}

fn to_sql_amount(amount: u64) -> Result<i64> {
    i64::try_from(amount).map_err(|_| LedgerError::InvalidAmount(amount))
}

fn ensure_account(conn: &Connection, account: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO accounts (id, balance, blocked, created_at) VALUES (?1, 0, 0, ?2)",
        params![account, Utc::now().timestamp()],
    )?;
    Ok(())
}

fn load_account(conn: &Connection, account: &str) -> Result<(u64, bool)> {
    let (balance, blocked): (i64, bool) = conn.query_row(
        "SELECT balance, blocked FROM accounts WHERE id = ?1",
        params![account],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((balance as u64, blocked))
}

/// Pays raffle winners out of the pot account.
pub struct LedgerPayout {
    ledger: Arc<Ledger>,
    pot: String,
}

impl LedgerPayout {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            pot: POT_ACCOUNT.to_string(),
        }
    }
}

#[async_trait]
impl PayoutSink for LedgerPayout {
    async fn transfer(&self, to: &ParticipantId, amount: u64) -> raffle_core::Result<()> {
        self.ledger
            .transfer(&self.pot, to.as_str(), amount, "payout")
            .await
            .map_err(|e| RaffleError::internal(e.to_string()))
    }
}
