use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Policy;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::journal::{self, NewEntry};
use crate::models::{Bucket, Investment, InvestmentStatus, Package, TxType, Wallet};
use crate::wallet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRequest {
    pub package_id: i64,
    pub amount: Decimal,
}

/// Principal plus the package's whole-term ROI.
pub fn expected_return(amount: Decimal, roi: Decimal) -> Result<Decimal> {
    wallet::add_money(amount, wallet::percent_of(amount, roi)?)
}

/// Open a contract: the total balance must cover `amount`, the principal is
/// taken from `deposit_balance`, and the wallet debit, contract row and
/// journal entry commit together.
pub fn create(
    conn: &mut Connection,
    policy: &Policy,
    user_id: &str,
    req: &InvestmentRequest,
    now: DateTime<Utc>,
) -> Result<(Investment, Wallet)> {
    policy.check_amount("investment", req.amount)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let package: Package = db::get_package(&tx, req.package_id)?
        .ok_or_else(|| LedgerError::not_found("Package", req.package_id))?;
    if !package.is_active {
        return Err(LedgerError::Validation(format!(
            "package {} is not available",
            package.name
        )));
    }
    let term = Duration::try_days(package.duration_days).ok_or_else(|| {
        LedgerError::Internal(format!("package {} has an invalid duration", package.id))
    })?;

    // Sufficiency is judged on the total balance, the debit on deposit_balance.
    let current = wallet::load(&tx, user_id)?;
    if current.balance < req.amount {
        return Err(LedgerError::InsufficientFunds {
            required: req.amount,
            available: current.balance,
        });
    }

    let amount = req.amount;
    let wallet = wallet::mutate(&tx, user_id, policy.wallet_cas_retries, |w| {
        w.debit(Bucket::Deposit, amount)?;
        w.total_invested = wallet::add_money(w.total_invested, amount)?;
        Ok(())
    })?;

    let start_date = now;
    let end_date = now.checked_add_signed(term).ok_or_else(|| {
        LedgerError::Internal(format!("package {} term overflows the calendar", package.id))
    })?;
    let expected = expected_return(amount, package.roi)?;
    let id = db::insert_investment(&tx, user_id, package.id, amount, expected, start_date, end_date)?;

    journal::append(
        &tx,
        NewEntry {
            user_id,
            tx_type: TxType::Investment,
            amount: -amount,
            reference_id: Some(id),
            description: Some(format!("Investment in {} package", package.name)),
        },
    )?;

    let investment =
        db::get_investment(&tx, id)?.ok_or_else(|| LedgerError::not_found("Investment", id))?;
    tx.commit()?;

    info!(
        "Investment #{} opened by {}: {} in {} (expected {}, ends {})",
        id, user_id, amount, package.name, expected, end_date
    );
    Ok((investment, wallet))
}

/// Effective status from the stored flag and the clock. Pure; never writes.
pub fn derive_status(investment: &Investment, now: DateTime<Utc>) -> InvestmentStatus {
    match investment.status {
        InvestmentStatus::Completed => InvestmentStatus::Completed,
        InvestmentStatus::Expired => InvestmentStatus::Expired,
        InvestmentStatus::Active if now > investment.end_date => InvestmentStatus::Expired,
        InvestmentStatus::Active => InvestmentStatus::Active,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestmentView {
    #[serde(flatten)]
    pub investment: Investment,
    pub effective_status: InvestmentStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct Classification {
    pub active: Vec<InvestmentView>,
    pub expired: Vec<InvestmentView>,
    pub completed: Vec<InvestmentView>,
    /// Stored as active but past end_date. For notifications only; never
    /// drives a balance change.
    pub newly_expired: Vec<i64>,
}

pub fn classify(investments: Vec<Investment>, now: DateTime<Utc>) -> Classification {
    let mut out = Classification::default();

    for investment in investments {
        let effective_status = derive_status(&investment, now);
        if investment.status == InvestmentStatus::Active && effective_status == InvestmentStatus::Expired {
            out.newly_expired.push(investment.id);
        }

        let view = InvestmentView {
            investment,
            effective_status,
        };
        match effective_status {
            InvestmentStatus::Active => out.active.push(view),
            InvestmentStatus::Expired => out.expired.push(view),
            InvestmentStatus::Completed => out.completed.push(view),
        }
    }

    out
}

/// A user's contracts with effective status recomputed for `now`.
pub fn list_for_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<Classification> {
    let investments = db::list_investments_for_user(conn, user_id)?;
    Ok(classify(investments, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_profile_with_wallet, test_conn};

    fn setup(deposit: i64, profit: i64) -> Connection {
        let conn = test_conn();
        insert_profile_with_wallet(&conn, "u1", None, Utc::now()).unwrap();
        if deposit > 0 {
            wallet::credit(&conn, "u1", Bucket::Deposit, Decimal::from(deposit), 3).unwrap();
        }
        if profit > 0 {
            wallet::credit(&conn, "u1", Bucket::Profit, Decimal::from(profit), 3).unwrap();
        }
        conn
    }

    fn sample(status: InvestmentStatus, end_date: DateTime<Utc>) -> Investment {
        Investment {
            id: 1,
            user_id: "u1".into(),
            package_id: 1,
            amount: Decimal::from(100),
            expected_return: Decimal::from(120),
            current_profit: Decimal::ZERO,
            start_date: end_date - Duration::days(30),
            end_date,
            status,
        }
    }

    #[test]
    fn create_debits_deposit_balance_exactly() {
        let mut conn = setup(500, 0);
        let now = Utc::now();
        let req = InvestmentRequest { package_id: 2, amount: Decimal::from(500) }; // Silver: 35%, 60 days

        let (inv, wallet) = create(&mut conn, &Policy::default(), "u1", &req, now).unwrap();
        assert_eq!(wallet.deposit_balance, Decimal::ZERO);
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.total_invested, Decimal::from(500));
        assert_eq!(inv.expected_return, Decimal::from(675));
        assert_eq!(inv.status, InvestmentStatus::Active);
        assert_eq!(inv.end_date - inv.start_date, Duration::days(60));

        let entries = journal::list_for_user(&conn, "u1", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tx_type, TxType::Investment);
        assert_eq!(entries[0].amount, Decimal::from(-500));
        assert_eq!(entries[0].reference_id, Some(inv.id));
    }

    #[test]
    fn create_checks_total_balance() {
        let mut conn = setup(100, 50);
        let req = InvestmentRequest { package_id: 1, amount: Decimal::from(151) };
        let err = create(&mut conn, &Policy::default(), "u1", &req, Utc::now()).unwrap_err();
        match err {
            LedgerError::InsufficientFunds { required, available } => {
                assert_eq!(required, Decimal::from(151));
                assert_eq!(available, Decimal::from(150));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn create_is_atomic_when_deposit_bucket_short() {
        // total balance covers it but deposit_balance does not
        let mut conn = setup(100, 50);
        let req = InvestmentRequest { package_id: 1, amount: Decimal::from(120) };
        let err = create(&mut conn, &Policy::default(), "u1", &req, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let wallet = wallet::load(&conn, "u1").unwrap();
        assert_eq!(wallet.deposit_balance, Decimal::from(100));
        assert_eq!(wallet.total_invested, Decimal::ZERO);
        assert!(db::list_investments_for_user(&conn, "u1").unwrap().is_empty());
        assert!(journal::list_for_user(&conn, "u1", 10).unwrap().is_empty());
    }

    #[test]
    fn create_rejects_unknown_package() {
        let mut conn = setup(100, 0);
        let req = InvestmentRequest { package_id: 42, amount: Decimal::from(10) };
        assert!(matches!(
            create(&mut conn, &Policy::default(), "u1", &req, Utc::now()),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn create_rejects_inactive_package() {
        let mut conn = setup(500, 0);
        conn.execute("UPDATE packages SET is_active = 0 WHERE id = 2", []).unwrap();
        let before = wallet::load(&conn, "u1").unwrap();

        let req = InvestmentRequest { package_id: 2, amount: Decimal::from(500) };
        assert!(matches!(
            create(&mut conn, &Policy::default(), "u1", &req, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(wallet::load(&conn, "u1").unwrap(), before);
        assert!(db::list_investments_for_user(&conn, "u1").unwrap().is_empty());
    }

    #[test]
    fn create_rejects_unbounded_amounts() {
        let mut conn = setup(500, 0);
        let policy = Policy::default();
        for amount in [Decimal::MAX, policy.max_amount + Decimal::ONE, Decimal::new(1001, 3)] {
            let req = InvestmentRequest { package_id: 1, amount };
            assert!(matches!(
                create(&mut conn, &policy, "u1", &req, Utc::now()),
                Err(LedgerError::Validation(_))
            ));
        }
        assert_eq!(wallet::load(&conn, "u1").unwrap().deposit_balance, Decimal::from(500));
        assert!(expected_return(Decimal::MAX, Decimal::from(20)).is_err());
    }

    #[test]
    fn derive_status_follows_clock() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        let future = now + Duration::days(3);

        assert_eq!(derive_status(&sample(InvestmentStatus::Active, future), now), InvestmentStatus::Active);
        assert_eq!(derive_status(&sample(InvestmentStatus::Active, past), now), InvestmentStatus::Expired);
        assert_eq!(derive_status(&sample(InvestmentStatus::Expired, future), now), InvestmentStatus::Expired);
        assert_eq!(derive_status(&sample(InvestmentStatus::Completed, past), now), InvestmentStatus::Completed);
    }

    #[test]
    fn derived_expiry_does_not_touch_storage() {
        let mut conn = setup(200, 0);
        let start = Utc::now() - Duration::days(45);
        let req = InvestmentRequest { package_id: 1, amount: Decimal::from(100) }; // 30-day term
        let (inv, _) = create(&mut conn, &Policy::default(), "u1", &req, start).unwrap();

        let now = Utc::now();
        let stored = db::get_investment(&conn, inv.id).unwrap().unwrap();
        assert_eq!(derive_status(&stored, now), InvestmentStatus::Expired);

        let reread = db::get_investment(&conn, inv.id).unwrap().unwrap();
        assert_eq!(reread.status, InvestmentStatus::Active);
        assert_eq!(reread, stored);
    }

    #[test]
    fn classify_partitions_and_flags_newly_expired() {
        let now = Utc::now();
        let mut a = sample(InvestmentStatus::Active, now + Duration::days(1));
        a.id = 1;
        let mut b = sample(InvestmentStatus::Active, now - Duration::days(1));
        b.id = 2;
        let mut c = sample(InvestmentStatus::Expired, now - Duration::days(9));
        c.id = 3;
        let mut d = sample(InvestmentStatus::Completed, now - Duration::days(9));
        d.id = 4;

        let out = classify(vec![a, b, c, d], now);
        assert_eq!(out.active.len(), 1);
        assert_eq!(out.expired.iter().map(|v| v.investment.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(out.completed.len(), 1);
        assert_eq!(out.newly_expired, vec![2]);
    }
}
