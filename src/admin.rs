use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::db;
use crate::journal;
use crate::error::Result;
use crate::models::{InvestmentStatus, RequestStatus, TxType, Wallet};
use crate::wallet::add_money;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_users: i64,
    pub total_balance: Decimal,
    pub total_deposit_balance: Decimal,
    pub total_profit_balance: Decimal,
    pub pending_deposits: usize,
    pub pending_withdrawals: usize,
    pub total_deposits_approved: Decimal,
    pub total_withdrawals_sent: Decimal,
    pub active_investments: usize, // by stored status
    pub active_principal: Decimal,
    pub total_profit_distributed: Decimal,
}

fn total(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, add_money)
}

pub fn stats(conn: &Connection) -> Result<Stats> {
    let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))?;

    let wallets = db::list_wallets(conn)?;
    let sum = |f: fn(&Wallet) -> Decimal| total(wallets.iter().map(f));

    let approved_deposits = db::list_deposits_by_status(conn, RequestStatus::Approved)?;
    let approved_withdrawals = db::list_withdrawals_by_status(conn, RequestStatus::Approved)?;
    let active = db::list_investments_by_status(conn, InvestmentStatus::Active)?;

    Ok(Stats {
        total_users,
        total_balance: sum(|w| w.balance)?,
        total_deposit_balance: sum(|w| w.deposit_balance)?,
        total_profit_balance: sum(|w| w.profit_balance)?,
        pending_deposits: db::list_deposits_by_status(conn, RequestStatus::Pending)?.len(),
        pending_withdrawals: db::list_withdrawals_by_status(conn, RequestStatus::Pending)?.len(),
        total_deposits_approved: total(approved_deposits.iter().map(|d| d.amount))?,
        total_withdrawals_sent: total(approved_withdrawals.iter().map(|w| w.amount_sent))?,
        active_investments: active.len(),
        active_principal: total(active.iter().map(|i| i.amount))?,
        total_profit_distributed: journal::total_by_type(conn, TxType::Profit)?,
    })
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub wallet: Option<Wallet>,
}

/// Every profile with its wallet, newest first.
pub fn users(conn: &Connection) -> Result<Vec<UserSummary>> {
    let mut wallets: HashMap<String, Wallet> = db::list_wallets(conn)?
        .into_iter()
        .map(|w| (w.user_id.clone(), w))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT p.user_id, p.email, p.created_at,
                EXISTS(SELECT 1 FROM user_roles r WHERE r.user_id = p.user_id AND r.role = 'admin')
         FROM profiles p
         ORDER BY p.created_at DESC, p.user_id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, DateTime<Utc>>(2)?,
            r.get::<_, bool>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (user_id, email, created_at, is_admin) = row?;
        let wallet = wallets.remove(&user_id);
        out.push(UserSummary {
            user_id,
            email,
            is_admin,
            created_at,
            wallet,
        });
    }
    Ok(out)
}
