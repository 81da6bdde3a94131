use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::config::Policy;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::journal::{self, NewEntry};
use crate::models::{Bucket, Deposit, RequestStatus, TxType, Wallet};
use crate::wallet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub network: String,
    pub transaction_hash: Option<String>, // optional proof of transfer
    pub screenshot_url: Option<String>,
}

fn default_currency() -> String {
    "USDT".to_string()
}

/// Record a claimed transfer as `pending`. No balance effect.
pub fn submit(conn: &Connection, policy: &Policy, user_id: &str, req: &DepositRequest) -> Result<Deposit> {
    policy.check_amount("deposit", req.amount)?;
    if req.network.trim().is_empty() {
        return Err(LedgerError::Validation("network is required".into()));
    }
    wallet::load(conn, user_id)?;

    let id = db::insert_deposit(
        conn,
        user_id,
        req.amount,
        req.currency.trim(),
        req.network.trim(),
        req.transaction_hash.as_deref(),
        req.screenshot_url.as_deref(),
        Utc::now(),
    )?;
    info!("Deposit #{} submitted by {}: {} {}", id, user_id, req.amount, req.currency);

    db::get_deposit(conn, id)?.ok_or_else(|| LedgerError::not_found("Deposit", id))
}

pub fn list_pending(conn: &Connection) -> Result<Vec<Deposit>> {
    Ok(db::list_deposits_by_status(conn, RequestStatus::Pending)?)
}

/// Mark the deposit approved, credit `deposit_balance` and journal it, all
/// in one transaction. A second approval fails with `InvalidState`.
pub fn approve(conn: &mut Connection, policy: &Policy, deposit_id: i64) -> Result<(Deposit, Wallet)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut deposit =
        db::get_deposit(&tx, deposit_id)?.ok_or_else(|| LedgerError::not_found("Deposit", deposit_id))?;
    if deposit.status != RequestStatus::Pending {
        return Err(LedgerError::not_pending("Deposit", deposit_id, deposit.status));
    }

    let now = Utc::now();
    if db::transition_deposit(&tx, deposit_id, RequestStatus::Pending, RequestStatus::Approved, None, now)? == 0 {
        return Err(LedgerError::not_pending("Deposit", deposit_id, "no longer pending"));
    }

    let wallet = wallet::credit(
        &tx,
        &deposit.user_id,
        Bucket::Deposit,
        deposit.amount,
        policy.wallet_cas_retries,
    )?;

    journal::append(
        &tx,
        NewEntry {
            user_id: &deposit.user_id,
            tx_type: TxType::Deposit,
            amount: deposit.amount,
            reference_id: Some(deposit_id),
            description: Some(format!("Deposit via {} ({})", deposit.network, deposit.currency)),
        },
    )?;

    tx.commit()?;

    deposit.status = RequestStatus::Approved;
    deposit.processed_at = Some(now);
    info!(
        "Deposit #{} approved: {} credited to {}",
        deposit_id, deposit.amount, deposit.user_id
    );
    Ok((deposit, wallet))
}

/// Terminal rejection with a reason. No balance effect.
pub fn reject(conn: &Connection, deposit_id: i64, reason: &str) -> Result<Deposit> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::Validation("rejection reason is required".into()));
    }

    let deposit =
        db::get_deposit(conn, deposit_id)?.ok_or_else(|| LedgerError::not_found("Deposit", deposit_id))?;
    if deposit.status != RequestStatus::Pending {
        return Err(LedgerError::not_pending("Deposit", deposit_id, deposit.status));
    }

    if db::transition_deposit(
        conn,
        deposit_id,
        RequestStatus::Pending,
        RequestStatus::Rejected,
        Some(reason),
        Utc::now(),
    )? == 0
    {
        return Err(LedgerError::not_pending("Deposit", deposit_id, "no longer pending"));
    }
    info!("Deposit #{} rejected: {}", deposit_id, reason);

    db::get_deposit(conn, deposit_id)?.ok_or_else(|| LedgerError::not_found("Deposit", deposit_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_profile_with_wallet, test_conn};

    fn request(amount: i64) -> DepositRequest {
        DepositRequest {
            amount: Decimal::from(amount),
            currency: "USDT".into(),
            network: "TRC20".into(),
            transaction_hash: Some("0xabc".into()),
            screenshot_url: None,
        }
    }

    fn setup() -> Connection {
        let conn = test_conn();
        insert_profile_with_wallet(&conn, "u1", None, Utc::now()).unwrap();
        conn
    }

    #[test]
    fn submit_has_no_balance_effect() {
        let conn = setup();
        let dep = submit(&conn, &Policy::default(), "u1", &request(250)).unwrap();
        assert_eq!(dep.status, RequestStatus::Pending);
        assert_eq!(wallet::load(&conn, "u1").unwrap().balance, Decimal::ZERO);
        assert_eq!(list_pending(&conn).unwrap().len(), 1);
    }

    #[test]
    fn submit_validates_input() {
        let conn = setup();
        assert!(matches!(submit(&conn, &Policy::default(), "u1", &request(0)), Err(LedgerError::Validation(_))));
        assert!(matches!(
            submit(&conn, &Policy::default(), "nobody", &request(10)),
            Err(LedgerError::WalletNotFound(_))
        ));
    }

    #[test]
    fn submit_rejects_unbounded_amounts() {
        let conn = setup();
        let policy = Policy::default();
        for amount in [Decimal::MAX, policy.max_amount + Decimal::ONE, Decimal::new(10001, 3)] {
            let req = DepositRequest { amount, ..request(1) };
            assert!(matches!(submit(&conn, &policy, "u1", &req), Err(LedgerError::Validation(_))));
        }
        assert!(list_pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn repeated_max_deposits_stay_serviceable() {
        let mut conn = setup();
        let policy = Policy {
            max_amount: Decimal::MAX,
            ..Policy::default()
        };
        let big = DepositRequest { amount: Decimal::MAX, ..request(1) };
        let first = submit(&conn, &policy, "u1", &big).unwrap();
        let second = submit(&conn, &policy, "u1", &request(1)).unwrap();

        approve(&mut conn, &policy, first.id).unwrap();
        let err = approve(&mut conn, &policy, second.id).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");

        let stored = db::get_deposit(&conn, second.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(wallet::load(&conn, "u1").unwrap().deposit_balance, Decimal::MAX);
    }

    #[test]
    fn approve_credits_exactly_once() {
        let mut conn = setup();
        let policy = Policy::default();
        let dep = submit(&conn, &Policy::default(), "u1", &request(250)).unwrap();

        let (approved, wallet) = approve(&mut conn, &policy, dep.id).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(wallet.deposit_balance, Decimal::from(250));
        assert_eq!(wallet.balance, Decimal::from(250));

        let err = approve(&mut conn, &policy, dep.id).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }), "{err:?}");
        assert_eq!(wallet::load(&conn, "u1").unwrap().deposit_balance, Decimal::from(250));

        let entries = journal::list_for_user(&conn, "u1", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tx_type, TxType::Deposit);
        assert_eq!(entries[0].reference_id, Some(dep.id));
    }

    #[test]
    fn approve_rolls_back_when_credit_fails() {
        let mut conn = setup();
        let dep = submit(&conn, &Policy::default(), "u1", &request(40)).unwrap();
        // wallet disappears between submit and approval
        conn.execute("DELETE FROM wallets WHERE user_id = 'u1'", []).unwrap();

        let err = approve(&mut conn, &Policy::default(), dep.id).unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound(_)));
        let stored = db::get_deposit(&conn, dep.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(journal::list_for_user(&conn, "u1", 10).unwrap().is_empty());
    }

    #[test]
    fn rejected_deposit_is_terminal() {
        let mut conn = setup();
        let dep = submit(&conn, &Policy::default(), "u1", &request(75)).unwrap();

        let rejected = reject(&conn, dep.id, "hash not found on chain").unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.admin_notes.as_deref(), Some("hash not found on chain"));

        assert!(matches!(
            approve(&mut conn, &Policy::default(), dep.id),
            Err(LedgerError::InvalidState { .. })
        ));
        assert!(matches!(reject(&conn, dep.id, "again"), Err(LedgerError::InvalidState { .. })));
        assert_eq!(wallet::load(&conn, "u1").unwrap().balance, Decimal::ZERO);
    }

    #[test]
    fn reject_requires_a_reason() {
        let conn = setup();
        let dep = submit(&conn, &Policy::default(), "u1", &request(75)).unwrap();
        assert!(matches!(reject(&conn, dep.id, "  "), Err(LedgerError::Validation(_))));
        let stored = db::get_deposit(&conn, dep.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.admin_notes, None);
    }

    #[test]
    fn unknown_deposit_is_not_found() {
        let mut conn = setup();
        assert!(matches!(
            approve(&mut conn, &Policy::default(), 999),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
