use dotenvy::dotenv;
use eyre::{eyre, Result};
use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{collections::HashSet, env, str::FromStr};
use tracing::info;

use crate::error::LedgerError;

/// Money policy shared by every workflow. Built once at startup and
/// passed by reference; nothing mutates it afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Policy {
    pub withdrawal_fee_percent: Decimal, // fee taken from each withdrawal, 0..100
    pub min_withdrawal: Decimal,
    pub money_scale: u32, // decimal places kept on computed amounts
    pub wallet_cas_retries: u32,
    pub max_amount: Decimal, // ceiling on any single user-supplied amount or balance
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            withdrawal_fee_percent: Decimal::from(10),
            min_withdrawal: Decimal::from(50),
            money_scale: 2,
            wallet_cas_retries: 5,
            max_amount: Decimal::from(1_000_000_000),
        }
    }
}

impl Policy {
    /// Truncate a computed amount to the configured scale. Rounds toward
    /// zero so a computed payout or fee never exceeds its exact value.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.money_scale, RoundingStrategy::ToZero)
    }

    /// A user-supplied amount: strictly positive, otherwise as `check_balance`.
    pub fn check_amount(&self, what: &str, amount: Decimal) -> crate::error::Result<()> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "{} amount must be greater than zero, got {}",
                what, amount
            )));
        }
        self.check_balance(what, amount)
    }

    /// Non-negative, at most `max_amount`, and no finer than `money_scale`.
    pub fn check_balance(&self, what: &str, amount: Decimal) -> crate::error::Result<()> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "{} must be non-negative, got {}",
                what, amount
            )));
        }
        if amount > self.max_amount {
            return Err(LedgerError::Validation(format!(
                "{} {} exceeds the maximum of {}",
                what, amount, self.max_amount
            )));
        }
        if amount.normalize().scale() > self.money_scale {
            return Err(LedgerError::Validation(format!(
                "{} {} has more than {} decimal places",
                what, amount, self.money_scale
            )));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.withdrawal_fee_percent < Decimal::ZERO
            || self.withdrawal_fee_percent >= Decimal::ONE_HUNDRED
        {
            return Err(eyre!(
                "WITHDRAWAL_FEE_PERCENT must be in [0, 100), got {}",
                self.withdrawal_fee_percent
            ));
        }
        if self.min_withdrawal < Decimal::ZERO {
            return Err(eyre!("MIN_WITHDRAWAL must be >= 0, got {}", self.min_withdrawal));
        }
        if self.max_amount <= Decimal::ZERO {
            return Err(eyre!("MAX_AMOUNT must be > 0, got {}", self.max_amount));
        }
        if self.wallet_cas_retries == 0 {
            return Err(eyre!("WALLET_CAS_RETRIES must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    pub admin_user_ids: HashSet<String>, // bootstrap admins written to user_roles
    pub policy: Policy,
}

fn decimal_var(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map_err(|e| eyre!("{} is not a decimal ({}): {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    let defaults = Policy::default();

    // SQLite DB path (default: ledger.db)
    let db_path = env::var("DATABASE_URL").unwrap_or_else(|_| "ledger.db".to_string());

    // API port (default: 8080)
    let port = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let policy = Policy {
        withdrawal_fee_percent: decimal_var("WITHDRAWAL_FEE_PERCENT", defaults.withdrawal_fee_percent)?,
        min_withdrawal: decimal_var("MIN_WITHDRAWAL", defaults.min_withdrawal)?,
        money_scale: env::var("MONEY_SCALE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.money_scale),
        wallet_cas_retries: env::var("WALLET_CAS_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.wallet_cas_retries),
        max_amount: decimal_var("MAX_AMOUNT", defaults.max_amount)?,
    };
    policy.validate()?;

    let admin_user_ids: HashSet<String> = env::var("ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let cfg = Config {
        db_path,
        port,
        admin_user_ids,
        policy,
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}
