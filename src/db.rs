use chrono::{DateTime, Utc};
use eyre::Result;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::{
    Deposit, Investment, InvestmentStatus, Package, RequestStatus, Wallet, Withdrawal,
};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
  user_id    TEXT PRIMARY KEY,
  email      TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_roles (
  user_id TEXT NOT NULL,
  role    TEXT NOT NULL,
  PRIMARY KEY (user_id, role)
);

-- Decimal columns are stored as strings
CREATE TABLE IF NOT EXISTS wallets (
  user_id         TEXT PRIMARY KEY REFERENCES profiles(user_id),
  balance         TEXT NOT NULL DEFAULT '0',
  deposit_balance TEXT NOT NULL DEFAULT '0',
  profit_balance  TEXT NOT NULL DEFAULT '0',
  total_invested  TEXT NOT NULL DEFAULT '0',
  total_withdrawn TEXT NOT NULL DEFAULT '0',
  total_profit    TEXT NOT NULL DEFAULT '0',
  version         INTEGER NOT NULL DEFAULT 0,
  updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deposits (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id          TEXT NOT NULL REFERENCES profiles(user_id),
  amount           TEXT NOT NULL,
  currency         TEXT NOT NULL,
  network          TEXT NOT NULL,
  transaction_hash TEXT,
  screenshot_url   TEXT,
  status           TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','approved','rejected')),
  admin_notes      TEXT,
  created_at       TEXT NOT NULL,
  processed_at     TEXT
);

CREATE TABLE IF NOT EXISTS withdrawals (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id          TEXT NOT NULL REFERENCES profiles(user_id),
  amount_requested TEXT NOT NULL,
  fee_amount       TEXT NOT NULL,
  amount_sent      TEXT NOT NULL,
  wallet_address   TEXT NOT NULL,
  network          TEXT NOT NULL,
  status           TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','approved','rejected')),
  admin_notes      TEXT,
  created_at       TEXT NOT NULL,
  processed_at     TEXT
);

CREATE TABLE IF NOT EXISTS packages (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  name          TEXT UNIQUE NOT NULL,
  price         TEXT NOT NULL,
  roi           TEXT NOT NULL,
  duration_days INTEGER NOT NULL CHECK (duration_days > 0),
  is_active     INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS investments (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id         TEXT NOT NULL REFERENCES profiles(user_id),
  package_id      INTEGER NOT NULL REFERENCES packages(id),
  amount          TEXT NOT NULL,
  expected_return TEXT NOT NULL,
  current_profit  TEXT NOT NULL DEFAULT '0',
  start_date      TEXT NOT NULL,
  end_date        TEXT NOT NULL,
  status          TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','completed','expired'))
);

CREATE TABLE IF NOT EXISTS transactions (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id      TEXT NOT NULL,
  type         TEXT NOT NULL CHECK (type IN ('deposit','withdrawal','investment','profit','referral')),
  amount       TEXT NOT NULL,
  status       TEXT NOT NULL,
  reference_id INTEGER,
  description  TEXT,
  created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deposits_status ON deposits(status);
CREATE INDEX IF NOT EXISTS idx_withdrawals_status ON withdrawals(status);
CREATE INDEX IF NOT EXISTS idx_investments_status ON investments(status);
CREATE INDEX IF NOT EXISTS idx_investments_user ON investments(user_id);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);
"#;

/// Default catalog: (name, price, roi %, duration days)
const DEFAULT_PACKAGES: &[(&str, &str, &str, i64)] = &[
    ("Starter", "100", "20", 30),
    ("Silver", "500", "35", 60),
    ("Gold", "1000", "50", 90),
    ("Platinum", "5000", "80", 180),
];

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Run schema migrations and seed the package catalog
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    for (name, price, roi, days) in DEFAULT_PACKAGES {
        conn.execute(
            "INSERT OR IGNORE INTO packages (name, price, roi, duration_days) VALUES (?1, ?2, ?3, ?4)",
            params![name, price, roi, days],
        )?;
    }
    Ok(())
}

// ---------- row helpers ----------

pub fn decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ---------- profiles & roles ----------

/// Create the profile and its zeroed wallet. Returns false if the user
/// already existed.
pub fn insert_profile_with_wallet(
    conn: &Connection,
    user_id: &str,
    email: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO profiles (user_id, email, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, email, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO wallets (user_id, updated_at) VALUES (?1, ?2)",
        params![user_id, now],
    )?;
    Ok(created > 0)
}

pub fn has_role(conn: &Connection, user_id: &str, role: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM user_roles WHERE user_id = ?1 AND role = ?2",
        params![user_id, role],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

pub fn grant_role(conn: &Connection, user_id: &str, role: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
        params![user_id, role],
    )?;
    Ok(())
}

// ---------- wallets ----------

const WALLET_COLUMNS: &str = "user_id, balance, deposit_balance, profit_balance, \
     total_invested, total_withdrawn, total_profit, version, updated_at";

fn wallet_from_row(r: &Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        user_id: r.get(0)?,
        balance: decimal(r, 1)?,
        deposit_balance: decimal(r, 2)?,
        profit_balance: decimal(r, 3)?,
        total_invested: decimal(r, 4)?,
        total_withdrawn: decimal(r, 5)?,
        total_profit: decimal(r, 6)?,
        version: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

pub fn get_wallet(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Wallet>> {
    conn.query_row(
        &format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?1"),
        [user_id],
        wallet_from_row,
    )
    .optional()
}

pub fn list_wallets(conn: &Connection) -> rusqlite::Result<Vec<Wallet>> {
    let mut stmt = conn.prepare(&format!("SELECT {WALLET_COLUMNS} FROM wallets ORDER BY user_id"))?;
    let rows = stmt.query_map([], wallet_from_row)?;
    rows.collect()
}

/// Compare-and-swap write: applies only if the stored version still equals
/// `expected_version`. Returns the number of rows written (0 or 1).
pub fn cas_update_wallet(
    conn: &Connection,
    wallet: &Wallet,
    expected_version: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        UPDATE wallets SET
            balance         = ?1,
            deposit_balance = ?2,
            profit_balance  = ?3,
            total_invested  = ?4,
            total_withdrawn = ?5,
            total_profit    = ?6,
            version         = ?7,
            updated_at      = ?8
        WHERE user_id = ?9 AND version = ?10
        "#,
        params![
            wallet.balance.to_string(),
            wallet.deposit_balance.to_string(),
            wallet.profit_balance.to_string(),
            wallet.total_invested.to_string(),
            wallet.total_withdrawn.to_string(),
            wallet.total_profit.to_string(),
            wallet.version,
            wallet.updated_at,
            wallet.user_id,
            expected_version
        ],
    )
}

// ---------- deposits ----------

const DEPOSIT_COLUMNS: &str = "id, user_id, amount, currency, network, transaction_hash, \
     screenshot_url, status, admin_notes, created_at, processed_at";

fn deposit_from_row(r: &Row<'_>) -> rusqlite::Result<Deposit> {
    Ok(Deposit {
        id: r.get(0)?,
        user_id: r.get(1)?,
        amount: decimal(r, 2)?,
        currency: r.get(3)?,
        network: r.get(4)?,
        transaction_hash: r.get(5)?,
        screenshot_url: r.get(6)?,
        status: r.get(7)?,
        admin_notes: r.get(8)?,
        created_at: r.get(9)?,
        processed_at: r.get(10)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_deposit(
    conn: &Connection,
    user_id: &str,
    amount: Decimal,
    currency: &str,
    network: &str,
    transaction_hash: Option<&str>,
    screenshot_url: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO deposits (
            user_id, amount, currency, network,
            transaction_hash, screenshot_url, status, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)
        "#,
        params![
            user_id,
            amount.to_string(),
            currency,
            network,
            transaction_hash,
            screenshot_url,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_deposit(conn: &Connection, id: i64) -> rusqlite::Result<Option<Deposit>> {
    conn.query_row(
        &format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = ?1"),
        [id],
        deposit_from_row,
    )
    .optional()
}

pub fn list_deposits_by_status(
    conn: &Connection,
    status: RequestStatus,
) -> rusqlite::Result<Vec<Deposit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE status = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([status], deposit_from_row)?;
    rows.collect()
}

/// Move a deposit out of `from` into `to`. Zero rows means another caller
/// already transitioned it.
pub fn transition_deposit(
    conn: &Connection,
    id: i64,
    from: RequestStatus,
    to: RequestStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE deposits SET status = ?1, admin_notes = COALESCE(?2, admin_notes), processed_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![to, notes, now, id, from],
    )
}

// ---------- withdrawals ----------

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount_requested, fee_amount, amount_sent, \
     wallet_address, network, status, admin_notes, created_at, processed_at";

fn withdrawal_from_row(r: &Row<'_>) -> rusqlite::Result<Withdrawal> {
    Ok(Withdrawal {
        id: r.get(0)?,
        user_id: r.get(1)?,
        amount_requested: decimal(r, 2)?,
        fee_amount: decimal(r, 3)?,
        amount_sent: decimal(r, 4)?,
        wallet_address: r.get(5)?,
        network: r.get(6)?,
        status: r.get(7)?,
        admin_notes: r.get(8)?,
        created_at: r.get(9)?,
        processed_at: r.get(10)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_withdrawal(
    conn: &Connection,
    user_id: &str,
    amount_requested: Decimal,
    fee_amount: Decimal,
    amount_sent: Decimal,
    wallet_address: &str,
    network: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO withdrawals (
            user_id, amount_requested, fee_amount, amount_sent,
            wallet_address, network, status, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)
        "#,
        params![
            user_id,
            amount_requested.to_string(),
            fee_amount.to_string(),
            amount_sent.to_string(),
            wallet_address,
            network,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_withdrawal(conn: &Connection, id: i64) -> rusqlite::Result<Option<Withdrawal>> {
    conn.query_row(
        &format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1"),
        [id],
        withdrawal_from_row,
    )
    .optional()
}

pub fn list_withdrawals_by_status(
    conn: &Connection,
    status: RequestStatus,
) -> rusqlite::Result<Vec<Withdrawal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE status = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([status], withdrawal_from_row)?;
    rows.collect()
}

pub fn transition_withdrawal(
    conn: &Connection,
    id: i64,
    from: RequestStatus,
    to: RequestStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE withdrawals SET status = ?1, admin_notes = COALESCE(?2, admin_notes), processed_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![to, notes, now, id, from],
    )
}

// ---------- packages ----------

const PACKAGE_COLUMNS: &str = "id, name, price, roi, duration_days, is_active";

fn package_from_row(r: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: r.get(0)?,
        name: r.get(1)?,
        price: decimal(r, 2)?,
        roi: decimal(r, 3)?,
        duration_days: r.get(4)?,
        is_active: r.get(5)?,
    })
}

pub fn get_package(conn: &Connection, id: i64) -> rusqlite::Result<Option<Package>> {
    conn.query_row(
        &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1"),
        [id],
        package_from_row,
    )
    .optional()
}

pub fn list_active_packages(conn: &Connection) -> rusqlite::Result<Vec<Package>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM packages WHERE is_active = 1 ORDER BY id"
    ))?;
    let rows = stmt.query_map([], package_from_row)?;
    rows.collect()
}

// ---------- investments ----------

const INVESTMENT_COLUMNS: &str = "id, user_id, package_id, amount, expected_return, \
     current_profit, start_date, end_date, status";

fn investment_from_row(r: &Row<'_>) -> rusqlite::Result<Investment> {
    Ok(Investment {
        id: r.get(0)?,
        user_id: r.get(1)?,
        package_id: r.get(2)?,
        amount: decimal(r, 3)?,
        expected_return: decimal(r, 4)?,
        current_profit: decimal(r, 5)?,
        start_date: r.get(6)?,
        end_date: r.get(7)?,
        status: r.get(8)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_investment(
    conn: &Connection,
    user_id: &str,
    package_id: i64,
    amount: Decimal,
    expected_return: Decimal,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO investments (
            user_id, package_id, amount, expected_return,
            current_profit, start_date, end_date, status
        )
        VALUES (?1, ?2, ?3, ?4, '0', ?5, ?6, 'active')
        "#,
        params![
            user_id,
            package_id,
            amount.to_string(),
            expected_return.to_string(),
            start_date,
            end_date
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_investment(conn: &Connection, id: i64) -> rusqlite::Result<Option<Investment>> {
    conn.query_row(
        &format!("SELECT {INVESTMENT_COLUMNS} FROM investments WHERE id = ?1"),
        [id],
        investment_from_row,
    )
    .optional()
}

pub fn list_investments_for_user(
    conn: &Connection,
    user_id: &str,
) -> rusqlite::Result<Vec<Investment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVESTMENT_COLUMNS} FROM investments WHERE user_id = ?1 ORDER BY start_date DESC, id DESC"
    ))?;
    let rows = stmt.query_map([user_id], investment_from_row)?;
    rows.collect()
}

/// Filter on the stored status column only.
pub fn list_investments_by_status(
    conn: &Connection,
    status: InvestmentStatus,
) -> rusqlite::Result<Vec<Investment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVESTMENT_COLUMNS} FROM investments WHERE status = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map([status], investment_from_row)?;
    rows.collect()
}

/// Overwrite (not accumulate) the last distributed share.
pub fn set_current_profit(conn: &Connection, id: i64, profit: Decimal) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE investments SET current_profit = ?1 WHERE id = ?2 AND status = 'active'",
        params![profit.to_string(), id],
    )
}

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.pragma_update(None, "foreign_keys", "ON").expect("foreign keys");
    run_migrations(&conn).expect("migrations");
    conn
}
