use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::auth::{self, Caller};
use crate::config::{Config, Policy};
use crate::deposit::{self, DepositRequest};
use crate::distributor;
use crate::error::Result;
use crate::investment::{self, InvestmentRequest};
use crate::withdrawal::{self, WithdrawalRequest};
use crate::{admin, db, journal, wallet};

#[derive(Clone)]
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub policy: Arc<Policy>,
}

/// One named admin action. Parameters use the camelCase names clients send.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum AdminAction {
    CheckAdmin,
    GetStats,
    GetUsers,
    #[serde(rename_all = "camelCase")]
    UpdateUserBalance {
        user_id: String,
        deposit_balance: Decimal,
        profit_balance: Decimal,
    },
    GetPendingDeposits,
    #[serde(rename_all = "camelCase")]
    ApproveDeposit { deposit_id: i64 },
    #[serde(rename_all = "camelCase")]
    RejectDeposit {
        deposit_id: i64,
        #[serde(default)]
        reason: String,
    },
    GetPendingWithdrawals,
    #[serde(rename_all = "camelCase")]
    ApproveWithdrawal { withdrawal_id: i64 },
    #[serde(rename_all = "camelCase")]
    RejectWithdrawal {
        withdrawal_id: i64,
        #[serde(default)]
        reason: String,
    },
    DistributeDailyProfit { percentage: Decimal },
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterBody {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub limit: Option<u32>, // defaults to 50
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Investment ledger API running" }))
        .route("/packages", get(list_packages))
        .route("/register", post(register))
        .route("/wallet", get(get_wallet))
        .route("/transactions", get(list_transactions))
        .route("/deposits", post(submit_deposit))
        .route("/withdrawals", post(request_withdrawal))
        .route("/investments", get(list_investments).post(create_investment))
        .route("/admin", post(admin_action))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(cfg: Config, conn: Arc<Mutex<Connection>>) -> eyre::Result<()> {
    let state = AppState {
        conn,
        policy: Arc::new(cfg.policy.clone()),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service()).await?;

    Ok(())
}

// ---------- DB wrappers (spawn_blocking) ----------

async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection, &Policy) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(&state.conn);
    let policy = Arc::clone(&state.policy);
    task::spawn_blocking(move || {
        // An unwinding handler has already rolled its transaction back.
        let mut db = conn.lock().unwrap_or_else(|poisoned| {
            warn!("Connection mutex was poisoned by a panicked handler, recovering");
            poisoned.into_inner()
        });
        f(&mut db, &policy)
    })
    .await?
}

// ---------- user actions ----------

async fn list_packages(State(state): State<AppState>) -> Result<Json<Value>> {
    let packages = with_conn(&state, |db, _| Ok(db::list_active_packages(db)?)).await?;
    Ok(Json(json!({ "packages": packages })))
}

async fn register(
    caller: Caller,
    State(state): State<AppState>,
    body: Option<Json<RegisterBody>>,
) -> Result<Json<Value>> {
    let email = body.and_then(|Json(b)| b.email);
    let wallet = with_conn(&state, move |db, _| {
        wallet::register(db, &caller.user_id, email.as_deref())
    })
    .await?;
    Ok(Json(json!({ "wallet": wallet })))
}

async fn get_wallet(caller: Caller, State(state): State<AppState>) -> Result<Json<Value>> {
    let wallet = with_conn(&state, move |db, _| wallet::load(db, &caller.user_id)).await?;
    Ok(Json(json!({ "wallet": wallet })))
}

async fn list_transactions(
    caller: Caller,
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
) -> Result<Json<Value>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let entries = with_conn(&state, move |db, _| {
        journal::list_for_user(db, &caller.user_id, limit)
    })
    .await?;
    Ok(Json(json!({ "transactions": entries })))
}

async fn submit_deposit(
    caller: Caller,
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<Value>> {
    let deposit = with_conn(&state, move |db, policy| {
        deposit::submit(db, policy, &caller.user_id, &req)
    })
    .await?;
    Ok(Json(json!({ "deposit": deposit })))
}

async fn request_withdrawal(
    caller: Caller,
    State(state): State<AppState>,
    Json(req): Json<WithdrawalRequest>,
) -> Result<Json<Value>> {
    let withdrawal = with_conn(&state, move |db, policy| {
        withdrawal::request(db, policy, &caller.user_id, &req)
    })
    .await?;
    Ok(Json(json!({ "withdrawal": withdrawal })))
}

async fn create_investment(
    caller: Caller,
    State(state): State<AppState>,
    Json(req): Json<InvestmentRequest>,
) -> Result<Json<Value>> {
    let (investment, wallet) = with_conn(&state, move |db, policy| {
        investment::create(db, policy, &caller.user_id, &req, Utc::now())
    })
    .await?;
    Ok(Json(json!({ "investment": investment, "wallet": wallet })))
}

async fn list_investments(caller: Caller, State(state): State<AppState>) -> Result<Json<Value>> {
    let classified = with_conn(&state, move |db, _| {
        investment::list_for_user(db, &caller.user_id, Utc::now())
    })
    .await?;
    Ok(Json(json!(classified)))
}

// ---------- admin actions ----------

async fn admin_action(
    caller: Caller,
    State(state): State<AppState>,
    Json(action): Json<AdminAction>,
) -> Result<Json<Value>> {
    info!("Admin action from {}: {:?}", caller.user_id, action);
    let body = with_conn(&state, move |db, policy| dispatch(db, policy, &caller, action)).await?;
    Ok(Json(body))
}

/// Runs the gate first; nothing below it executes for a non-admin.
fn dispatch(db: &mut Connection, policy: &Policy, caller: &Caller, action: AdminAction) -> Result<Value> {
    if let AdminAction::CheckAdmin = action {
        return Ok(json!({ "isAdmin": auth::is_admin(db, &caller.user_id)? }));
    }
    auth::require_admin(db, caller)?;

    let body = match action {
        AdminAction::CheckAdmin => json!({ "isAdmin": true }),
        AdminAction::GetStats => json!({ "stats": admin::stats(db)? }),
        AdminAction::GetUsers => json!({ "users": admin::users(db)? }),
        AdminAction::UpdateUserBalance {
            user_id,
            deposit_balance,
            profit_balance,
        } => {
            let (_, wallet) = wallet::set_balances(db, policy, &user_id, deposit_balance, profit_balance)?;
            json!({ "success": true, "wallet": wallet })
        }
        AdminAction::GetPendingDeposits => json!({ "deposits": deposit::list_pending(db)? }),
        AdminAction::ApproveDeposit { deposit_id } => {
            let (deposit, wallet) = deposit::approve(db, policy, deposit_id)?;
            json!({ "success": true, "deposit": deposit, "wallet": wallet })
        }
        AdminAction::RejectDeposit { deposit_id, reason } => {
            let deposit = deposit::reject(db, deposit_id, &reason)?;
            json!({ "success": true, "deposit": deposit })
        }
        AdminAction::GetPendingWithdrawals => {
            json!({ "withdrawals": withdrawal::list_pending(db)? })
        }
        AdminAction::ApproveWithdrawal { withdrawal_id } => {
            let (withdrawal, wallet) = withdrawal::approve(db, policy, withdrawal_id)?;
            json!({ "success": true, "withdrawal": withdrawal, "wallet": wallet })
        }
        AdminAction::RejectWithdrawal { withdrawal_id, reason } => {
            let withdrawal = withdrawal::reject(db, withdrawal_id, &reason)?;
            json!({ "success": true, "withdrawal": withdrawal })
        }
        AdminAction::DistributeDailyProfit { percentage } => {
            let report = distributor::distribute(db, policy, percentage)?.into_result()?;
            json!({
                "success": true,
                "usersUpdated": report.users_updated,
                "totalDistributed": report.total_distributed,
                "report": report,
            })
        }
    };

    Ok(body)
}
