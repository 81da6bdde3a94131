use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::Policy;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::models::{Bucket, Wallet};

impl Wallet {
    pub fn bucket(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Deposit => self.deposit_balance,
            Bucket::Profit => self.profit_balance,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Decimal {
        match bucket {
            Bucket::Deposit => &mut self.deposit_balance,
            Bucket::Profit => &mut self.profit_balance,
        }
    }

    pub fn credit(&mut self, bucket: Bucket, amount: Decimal) -> Result<()> {
        ensure_positive(amount)?;
        let next = add_money(self.bucket(bucket), amount)?;
        *self.bucket_mut(bucket) = next;
        self.recompute_balance()
    }

    pub fn debit(&mut self, bucket: Bucket, amount: Decimal) -> Result<()> {
        ensure_positive(amount)?;
        let available = self.bucket(bucket);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        *self.bucket_mut(bucket) -= amount;
        self.recompute_balance()
    }

    pub fn recompute_balance(&mut self) -> Result<()> {
        self.balance = add_money(self.deposit_balance, self.profit_balance)?;
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.deposit_balance.checked_add(self.profit_balance) == Some(self.balance)
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(())
}

/// Overflow-checked addition for money. Overflow is reported, never a panic.
pub fn add_money(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::Validation(format!("amount overflow adding {} to {}", b, a)))
}

/// `amount * percent / 100`, overflow-checked.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Result<Decimal> {
    amount
        .checked_mul(percent)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| LedgerError::Validation(format!("amount overflow taking {}% of {}", percent, amount)))
}

/// Provision the profile and a zeroed wallet. Safe to call repeatedly.
pub fn register(conn: &Connection, user_id: &str, email: Option<&str>) -> Result<Wallet> {
    if user_id.trim().is_empty() {
        return Err(LedgerError::Validation("user id is required".into()));
    }
    if db::insert_profile_with_wallet(conn, user_id, email, Utc::now())? {
        info!("Registered user {}", user_id);
    }
    load(conn, user_id)
}

pub fn load(conn: &Connection, user_id: &str) -> Result<Wallet> {
    db::get_wallet(conn, user_id)?.ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))
}

/// Read-current-then-write-current. `apply` runs against the freshly loaded
/// row and the result is written with a version check; a lost race re-reads
/// and re-applies. `balance` is recomputed before every write.
pub fn mutate<F>(conn: &Connection, user_id: &str, max_attempts: u32, mut apply: F) -> Result<Wallet>
where
    F: FnMut(&mut Wallet) -> Result<()>,
{
    for attempt in 1..=max_attempts {
        let current = load(conn, user_id)?;
        let mut next = current.clone();
        apply(&mut next)?;
        next.recompute_balance()?;
        debug_assert!(next.is_consistent());
        next.version = current.version + 1;
        next.updated_at = Utc::now();

        if db::cas_update_wallet(conn, &next, current.version)? == 1 {
            return Ok(next);
        }
        debug!(
            "Wallet {} changed underneath us (attempt {}/{}), retrying",
            user_id, attempt, max_attempts
        );
    }

    Err(LedgerError::Conflict(format!(
        "wallet {} still contended after {} attempts",
        user_id, max_attempts
    )))
}

/// Add `amount` to one bucket. The caller writes the paired ledger entry.
pub fn credit(
    conn: &Connection,
    user_id: &str,
    bucket: Bucket,
    amount: Decimal,
    max_attempts: u32,
) -> Result<Wallet> {
    let wallet = mutate(conn, user_id, max_attempts, |w| w.credit(bucket, amount))?;
    info!(
        "Credited {} {} to {} => balance {}",
        amount, bucket, user_id, wallet.balance
    );
    Ok(wallet)
}

/// Administrative override of both buckets. Lifetime counters are untouched.
pub fn set_balances(
    conn: &Connection,
    policy: &Policy,
    user_id: &str,
    deposit_balance: Decimal,
    profit_balance: Decimal,
) -> Result<(Wallet, Wallet)> {
    policy.check_balance("deposit balance", deposit_balance)?;
    policy.check_balance("profit balance", profit_balance)?;

    let mut before = None;
    let after = mutate(conn, user_id, policy.wallet_cas_retries, |w| {
        before = Some(w.clone());
        w.deposit_balance = deposit_balance;
        w.profit_balance = profit_balance;
        Ok(())
    })?;
    let before = before.ok_or_else(|| LedgerError::Internal("override never applied".into()))?;

    info!(
        "Admin override for {}: deposit {} -> {}, profit {} -> {}",
        user_id, before.deposit_balance, after.deposit_balance, before.profit_balance, after.profit_balance
    );
    Ok((before, after))
}
