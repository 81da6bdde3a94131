//! Append-only transaction log. Rows are inserted, never updated or deleted.

use chrono::Utc;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use tracing::debug;

use crate::db;
use crate::error::Result;
use crate::models::{LedgerEntry, TxType};
use crate::wallet::add_money;

pub struct NewEntry<'a> {
    pub user_id: &'a str,
    pub tx_type: TxType,
    pub amount: Decimal, // signed: outflows are negative
    pub reference_id: Option<i64>,
    pub description: Option<String>,
}

pub fn append(conn: &Connection, entry: NewEntry<'_>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO transactions (user_id, type, amount, status, reference_id, description, created_at)
        VALUES (?1, ?2, ?3, 'completed', ?4, ?5, ?6)
        "#,
        params![
            entry.user_id,
            entry.tx_type,
            entry.amount.to_string(),
            entry.reference_id,
            entry.description,
            Utc::now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(
        "Journal #{}: {} {} for {}",
        id, entry.tx_type, entry.amount, entry.user_id
    );
    Ok(id)
}

pub fn list_for_user(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, type, amount, status, reference_id, description, created_at
         FROM transactions
         WHERE user_id = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit as i64], |r| {
        Ok(LedgerEntry {
            id: r.get(0)?,
            user_id: r.get(1)?,
            tx_type: r.get(2)?,
            amount: db::decimal(r, 3)?,
            status: r.get(4)?,
            reference_id: r.get(5)?,
            description: r.get(6)?,
            created_at: r.get(7)?,
        })
    })?;

    let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Sum of all entries of one type across every user.
pub fn total_by_type(conn: &Connection, tx_type: TxType) -> Result<Decimal> {
    let mut stmt = conn.prepare("SELECT amount FROM transactions WHERE type = ?1")?;
    let rows = stmt.query_map([tx_type], |r| db::decimal(r, 0))?;

    let mut total = Decimal::ZERO;
    for amount in rows {
        total = add_money(total, amount?)?;
    }
    Ok(total)
}
