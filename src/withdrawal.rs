use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Policy;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::journal::{self, NewEntry};
use crate::models::{Bucket, RequestStatus, TxType, Wallet, Withdrawal};
use crate::wallet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub wallet_address: String,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_network() -> String {
    "TRC20".to_string()
}

/// Fee split fixed at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub amount_requested: Decimal,
    pub fee_amount: Decimal,
    pub amount_sent: Decimal,
}

/// `fee + sent == requested` holds exactly: the fee is rounded first and
/// the sent amount is its complement.
pub fn quote(policy: &Policy, amount: Decimal) -> Result<FeeQuote> {
    let fee_amount = policy.round(wallet::percent_of(amount, policy.withdrawal_fee_percent)?);
    Ok(FeeQuote {
        amount_requested: amount,
        fee_amount,
        amount_sent: amount - fee_amount,
    })
}

/// Validate against the current profit balance and persist as `pending`.
/// Funds are not reserved here; `approve` re-checks the balance.
pub fn request(
    conn: &Connection,
    policy: &Policy,
    user_id: &str,
    req: &WithdrawalRequest,
) -> Result<Withdrawal> {
    policy.check_amount("withdrawal", req.amount)?;
    if req.wallet_address.trim().is_empty() {
        return Err(LedgerError::Validation("wallet address is required".into()));
    }
    if req.amount < policy.min_withdrawal {
        return Err(LedgerError::BelowMinimum {
            requested: req.amount,
            minimum: policy.min_withdrawal,
        });
    }

    let wallet = wallet::load(conn, user_id)?;
    if wallet.profit_balance < req.amount {
        return Err(LedgerError::InsufficientFunds {
            required: req.amount,
            available: wallet.profit_balance,
        });
    }

    let q = quote(policy, req.amount)?;
    let id = db::insert_withdrawal(
        conn,
        user_id,
        q.amount_requested,
        q.fee_amount,
        q.amount_sent,
        req.wallet_address.trim(),
        req.network.trim(),
        Utc::now(),
    )?;
    info!(
        "Withdrawal #{} requested by {}: {} (fee {}, sending {})",
        id, user_id, q.amount_requested, q.fee_amount, q.amount_sent
    );

    db::get_withdrawal(conn, id)?.ok_or_else(|| LedgerError::not_found("Withdrawal", id))
}

pub fn list_pending(conn: &Connection) -> Result<Vec<Withdrawal>> {
    Ok(db::list_withdrawals_by_status(conn, RequestStatus::Pending)?)
}

/// Debit `amount_requested` from profit, count `amount_sent` as withdrawn,
/// mark approved and journal it. If the balance no longer covers the
/// request the whole approval is rolled back and the request stays pending.
pub fn approve(
    conn: &mut Connection,
    policy: &Policy,
    withdrawal_id: i64,
) -> Result<(Withdrawal, Wallet)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut withdrawal = db::get_withdrawal(&tx, withdrawal_id)?
        .ok_or_else(|| LedgerError::not_found("Withdrawal", withdrawal_id))?;
    if withdrawal.status != RequestStatus::Pending {
        return Err(LedgerError::not_pending("Withdrawal", withdrawal_id, withdrawal.status));
    }

    let requested = withdrawal.amount_requested;
    let sent = withdrawal.amount_sent;
    let wallet = wallet::mutate(&tx, &withdrawal.user_id, policy.wallet_cas_retries, |w| {
        w.debit(Bucket::Profit, requested)?;
        w.total_withdrawn = wallet::add_money(w.total_withdrawn, sent)?;
        Ok(())
    })
    .map_err(|e| {
        if let LedgerError::InsufficientFunds { .. } = e {
            warn!(
                "Withdrawal #{} no longer covered ({}); left pending for reconciliation",
                withdrawal_id, e
            );
        }
        e
    })?;

    let now = Utc::now();
    if db::transition_withdrawal(
        &tx,
        withdrawal_id,
        RequestStatus::Pending,
        RequestStatus::Approved,
        None,
        now,
    )? == 0
    {
        return Err(LedgerError::not_pending("Withdrawal", withdrawal_id, "no longer pending"));
    }

    journal::append(
        &tx,
        NewEntry {
            user_id: &withdrawal.user_id,
            tx_type: TxType::Withdrawal,
            amount: -sent,
            reference_id: Some(withdrawal_id),
            description: Some(format!(
                "Withdrawal to {} ({} fee {})",
                withdrawal.wallet_address, withdrawal.network, withdrawal.fee_amount
            )),
        },
    )?;

    tx.commit()?;

    withdrawal.status = RequestStatus::Approved;
    withdrawal.processed_at = Some(now);
    info!(
        "Withdrawal #{} approved: {} debited from {}, {} sent",
        withdrawal_id, requested, withdrawal.user_id, sent
    );
    Ok((withdrawal, wallet))
}

/// Terminal rejection. No balance effect.
pub fn reject(conn: &Connection, withdrawal_id: i64, reason: &str) -> Result<Withdrawal> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::Validation("rejection reason is required".into()));
    }

    let withdrawal = db::get_withdrawal(conn, withdrawal_id)?
        .ok_or_else(|| LedgerError::not_found("Withdrawal", withdrawal_id))?;
    if withdrawal.status != RequestStatus::Pending {
        return Err(LedgerError::not_pending("Withdrawal", withdrawal_id, withdrawal.status));
    }

    if db::transition_withdrawal(
        conn,
        withdrawal_id,
        RequestStatus::Pending,
        RequestStatus::Rejected,
        Some(reason),
        Utc::now(),
    )? == 0
    {
        return Err(LedgerError::not_pending("Withdrawal", withdrawal_id, "no longer pending"));
    }
    info!("Withdrawal #{} rejected: {}", withdrawal_id, reason);

    db::get_withdrawal(conn, withdrawal_id)?
        .ok_or_else(|| LedgerError::not_found("Withdrawal", withdrawal_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_profile_with_wallet, test_conn};

    fn setup(profit: Decimal) -> Connection {
        let conn = test_conn();
        insert_profile_with_wallet(&conn, "u1", None, Utc::now()).unwrap();
        if profit > Decimal::ZERO {
            wallet::credit(&conn, "u1", Bucket::Profit, profit, 3).unwrap();
        }
        conn
    }

    fn req(amount: Decimal) -> WithdrawalRequest {
        WithdrawalRequest {
            amount,
            wallet_address: "TXyz123".into(),
            network: "TRC20".into(),
        }
    }

    #[test]
    fn fee_split_adds_up() {
        let policy = Policy::default();
        let q = quote(&policy, Decimal::from(100)).unwrap();
        assert_eq!(q.fee_amount, Decimal::from(10));
        assert_eq!(q.amount_sent, Decimal::from(90));

        let odd = quote(&policy, Decimal::new(5555, 2)).unwrap(); // 55.55
        assert_eq!(odd.fee_amount, Decimal::new(555, 2));
        assert_eq!(odd.fee_amount + odd.amount_sent, odd.amount_requested);
    }

    #[test]
    fn request_enforces_minimum() {
        let conn = setup(Decimal::from(500));
        let err = request(&conn, &Policy::default(), "u1", &req(Decimal::from(49))).unwrap_err();
        match err {
            LedgerError::BelowMinimum { requested, minimum } => {
                assert_eq!(requested, Decimal::from(49));
                assert_eq!(minimum, Decimal::from(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn request_rejects_unbounded_amounts() {
        let conn = setup(Decimal::from(500));
        let policy = Policy::default();
        for amount in [Decimal::MAX, policy.max_amount + Decimal::ONE, Decimal::new(60001, 3)] {
            assert!(matches!(
                request(&conn, &policy, "u1", &req(amount)),
                Err(LedgerError::Validation(_))
            ));
        }
        assert!(list_pending(&conn).unwrap().is_empty());
        assert!(quote(&policy, Decimal::MAX).is_err());
    }

    #[test]
    fn request_boundary_on_profit_balance() {
        let profit = Decimal::new(12050, 2); // 120.50
        let conn = setup(profit);
        let policy = Policy::default();

        let over = request(&conn, &policy, "u1", &req(profit + Decimal::new(1, 2))).unwrap_err();
        assert!(matches!(over, LedgerError::InsufficientFunds { .. }), "{over:?}");

        let exact = request(&conn, &policy, "u1", &req(profit)).unwrap();
        assert_eq!(exact.status, RequestStatus::Pending);
        assert_eq!(exact.fee_amount + exact.amount_sent, exact.amount_requested);
        // no balance effect until approval
        assert_eq!(wallet::load(&conn, "u1").unwrap().profit_balance, profit);
    }

    #[test]
    fn approve_debits_requested_and_counts_sent() {
        let mut conn = setup(Decimal::from(300));
        let policy = Policy::default();
        let w = request(&conn, &policy, "u1", &req(Decimal::from(100))).unwrap();

        let (approved, wallet) = approve(&mut conn, &policy, w.id).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(wallet.profit_balance, Decimal::from(200));
        assert_eq!(wallet.total_withdrawn, Decimal::from(90));
        assert!(wallet.is_consistent());

        let entries = journal::list_for_user(&conn, "u1", 10).unwrap();
        assert_eq!(entries[0].tx_type, TxType::Withdrawal);
        assert_eq!(entries[0].amount, Decimal::from(-90));

        assert!(matches!(
            approve(&mut conn, &policy, w.id),
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[test]
    fn overcommitted_request_stays_pending() {
        let mut conn = setup(Decimal::from(100));
        let policy = Policy::default();
        let first = request(&conn, &policy, "u1", &req(Decimal::from(80))).unwrap();
        let second = request(&conn, &policy, "u1", &req(Decimal::from(80))).unwrap();

        approve(&mut conn, &policy, first.id).unwrap();
        let err = approve(&mut conn, &policy, second.id).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let stored = db::get_withdrawal(&conn, second.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        let wallet = wallet::load(&conn, "u1").unwrap();
        assert_eq!(wallet.profit_balance, Decimal::from(20));
        assert_eq!(wallet.total_withdrawn, Decimal::from(72));
    }

    #[test]
    fn reject_leaves_wallet_untouched() {
        let mut conn = setup(Decimal::from(100));
        let policy = Policy::default();
        let w = request(&conn, &policy, "u1", &req(Decimal::from(60))).unwrap();

        let rejected = reject(&conn, w.id, "address flagged").unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert!(matches!(approve(&mut conn, &policy, w.id), Err(LedgerError::InvalidState { .. })));

        let wallet = wallet::load(&conn, "u1").unwrap();
        assert_eq!(wallet.profit_balance, Decimal::from(100));
        assert_eq!(wallet.total_withdrawn, Decimal::ZERO);
    }

    #[test]
    fn reject_requires_a_reason() {
        let conn = setup(Decimal::from(100));
        let w = request(&conn, &Policy::default(), "u1", &req(Decimal::from(60))).unwrap();
        assert!(matches!(reject(&conn, w.id, ""), Err(LedgerError::Validation(_))));
        assert!(matches!(reject(&conn, w.id, "  "), Err(LedgerError::Validation(_))));
        let stored = db::get_withdrawal(&conn, w.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }
}
