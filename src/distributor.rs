use std::collections::BTreeMap;

use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Policy;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::journal::{self, NewEntry};
use crate::models::{Bucket, Investment, InvestmentStatus, TxType};
use crate::wallet;

#[derive(Debug, Clone, Serialize)]
pub struct UserFailure {
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    pub percentage: Decimal,
    pub investments_considered: usize,
    pub users_updated: usize,
    pub total_distributed: Decimal,
    pub failures: Vec<UserFailure>,
}

impl DistributionReport {
    /// Err if any user was skipped, carrying the aggregate counts.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(LedgerError::PartialBatchFailure {
                users_updated: self.users_updated,
                users_failed: self.failures.len(),
                total_distributed: self.total_distributed,
                failures: self.failures,
            })
        }
    }
}

/// One user's slice of a run.
#[derive(Debug, Default)]
struct UserShare {
    total: Decimal,
    per_investment: Vec<(i64, Decimal)>,
}

pub fn validate_percentage(percentage: Decimal) -> Result<()> {
    if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(LedgerError::Validation(format!(
            "invalid percentage {}: must be in (0, 100]",
            percentage
        )));
    }
    Ok(())
}

/// Group per-investment profit by owner.
fn shares(
    policy: &Policy,
    investments: &[Investment],
    percentage: Decimal,
) -> Result<BTreeMap<String, UserShare>> {
    let mut by_user: BTreeMap<String, UserShare> = BTreeMap::new();
    for inv in investments {
        let profit = policy.round(wallet::percent_of(inv.amount, percentage)?);
        let share = by_user.entry(inv.user_id.clone()).or_default();
        share.total = wallet::add_money(share.total, profit)?;
        share.per_investment.push((inv.id, profit));
    }
    Ok(by_user)
}

/// Credit every stored-`active` investment with `percentage` of its
/// principal. Eligibility reads the stored flag, not the derived status, so
/// a contract past end_date keeps paying until something flips its row.
/// Each user is committed in its own transaction; a failing user is logged
/// and skipped.
pub fn distribute(conn: &mut Connection, policy: &Policy, percentage: Decimal) -> Result<DistributionReport> {
    validate_percentage(percentage)?;

    let investments = db::list_investments_by_status(conn, InvestmentStatus::Active)?;
    let by_user = shares(policy, &investments, percentage)?;
    info!(
        "Distributing {}% across {} active investments ({} users)",
        percentage,
        investments.len(),
        by_user.len()
    );

    let mut report = DistributionReport {
        percentage,
        investments_considered: investments.len(),
        users_updated: 0,
        total_distributed: Decimal::ZERO,
        failures: Vec::new(),
    };

    for (user_id, share) in by_user {
        match credit_user(conn, policy, &user_id, &share, percentage) {
            Ok(()) => {
                report.users_updated += 1;
                report.total_distributed = wallet::add_money(report.total_distributed, share.total)?;
            }
            Err(e) => {
                warn!("Skipping profit for {}: {}", user_id, e);
                report.failures.push(UserFailure {
                    user_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    if report.failures.is_empty() {
        info!(
            "Distribution done: {} users, {} total",
            report.users_updated, report.total_distributed
        );
    } else {
        error!(
            "Distribution finished with {} failed users ({} credited, {} total)",
            report.failures.len(),
            report.users_updated,
            report.total_distributed
        );
    }

    Ok(report)
}

/// Wallet credit, per-investment overwrite and journal entry for one user.
fn credit_user(
    conn: &mut Connection,
    policy: &Policy,
    user_id: &str,
    share: &UserShare,
    percentage: Decimal,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if share.total > Decimal::ZERO {
        let total = share.total;
        wallet::mutate(&tx, user_id, policy.wallet_cas_retries, |w| {
            w.credit(Bucket::Profit, total)?;
            w.total_profit = wallet::add_money(w.total_profit, total)?;
            Ok(())
        })?;
    } else {
        // rounding ate the whole share; still require the wallet to exist
        wallet::load(&tx, user_id)?;
    }

    // A contract that left `active` since the run was planned voids the
    // whole unit, wallet credit included.
    for (investment_id, profit) in &share.per_investment {
        if db::set_current_profit(&tx, *investment_id, *profit)? == 0 {
            return Err(LedgerError::InvalidState {
                entity: "Investment",
                id: *investment_id,
                expected: "active",
                actual: "no longer active".into(),
            });
        }
    }

    if share.total > Decimal::ZERO {
        journal::append(
            &tx,
            NewEntry {
                user_id,
                tx_type: TxType::Profit,
                amount: share.total,
                reference_id: None,
                description: Some(format!(
                    "Daily profit {}% on {} investment(s)",
                    percentage,
                    share.per_investment.len()
                )),
            },
        )?;
    }

    tx.commit()?;
    info!("Credited {} profit to {}", share.total, user_id);
    Ok(())
}
