// src/models.rs
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Enums persisted as lowercase TEXT columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Which half of a wallet an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Deposit,
    Profit,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Deposit => f.write_str("deposit"),
            Bucket::Profit => f.write_str("profit"),
        }
    }
}

/// Lifecycle of deposit and withdrawal requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(RequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentStatus {
    Active,
    Completed,
    Expired,
}

text_enum!(InvestmentStatus {
    Active => "active",
    Completed => "completed",
    Expired => "expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Investment,
    Profit,
    Referral,
}

text_enum!(TxType {
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Investment => "investment",
    Profit => "profit",
    Referral => "referral",
});

/// Per-user balances. `balance` is stored redundantly and must always equal
/// `deposit_balance + profit_balance`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub user_id: String,
    pub balance: Decimal,
    pub deposit_balance: Decimal,
    pub profit_balance: Decimal,
    pub total_invested: Decimal,
    pub total_withdrawn: Decimal,
    pub total_profit: Decimal,
    #[serde(skip)]
    pub version: i64, // CAS token, bumped on every write
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deposit {
    pub id: i64,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
    pub transaction_hash: Option<String>,
    pub screenshot_url: Option<String>,
    pub status: RequestStatus,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: String,
    pub amount_requested: Decimal,
    pub fee_amount: Decimal,
    pub amount_sent: Decimal, // amount_requested - fee_amount
    pub wallet_address: String,
    pub network: String,
    pub status: RequestStatus,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Immutable catalog entry an investment is bought against.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub roi: Decimal, // percent over the whole term
    pub duration_days: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investment {
    pub id: i64,
    pub user_id: String,
    pub package_id: i64,
    pub amount: Decimal,
    pub expected_return: Decimal,
    pub current_profit: Decimal, // last distributed share, not cumulative
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: InvestmentStatus, // stored flag; see investment::derive_status
}

/// Append-only audit entry. Outflows carry a negative amount.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub amount: Decimal,
    pub status: String,
    pub reference_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
