mod admin;
mod api;
mod auth;
mod config;
mod db;
mod deposit;
mod distributor;
mod error;
mod investment;
mod journal;
mod models;
mod wallet;
mod withdrawal;

use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,invest_ledger=debug")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Investment ledger starting...");

    // Load configuration
    let cfg = config::load()?;
    info!("  DB Path: {}", cfg.db_path);
    info!("  Port: {}", cfg.port);
    info!(
        "  Withdrawal fee: {}%, minimum {}",
        cfg.policy.withdrawal_fee_percent, cfg.policy.min_withdrawal
    );
    info!("  Bootstrap admins: {:?}", cfg.admin_user_ids);

    // Run DB migrations once at startup
    {
        let conn = db::connect(&cfg.db_path)?;
        db::run_migrations(&conn)?;
        auth::bootstrap_admins(&conn, &cfg.admin_user_ids)?;
    }

    // Shared DB connection
    let shared_conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        let conn = Arc::clone(&shared_conn);
        async move { api::serve(cfg, conn).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Investment ledger stopped.");
    Ok(())
}
