use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::db;
use crate::error::{LedgerError, Result};

pub const ADMIN_ROLE: &str = "admin";

/// Header carrying the identity resolved by the upstream identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller of an action.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(LedgerError::Unauthenticated)?;

        Ok(Caller {
            user_id: user_id.to_string(),
        })
    }
}

pub fn is_admin(conn: &Connection, user_id: &str) -> Result<bool> {
    Ok(db::has_role(conn, user_id, ADMIN_ROLE)?)
}

/// Must pass before any admin action body touches the store.
pub fn require_admin(conn: &Connection, caller: &Caller) -> Result<()> {
    if is_admin(conn, &caller.user_id)? {
        Ok(())
    } else {
        warn!("Non-admin {} attempted an admin action", caller.user_id);
        Err(LedgerError::AccessDenied(caller.user_id.clone()))
    }
}

/// Grant the admin role to the configured bootstrap identities.
pub fn bootstrap_admins(conn: &Connection, user_ids: &HashSet<String>) -> Result<()> {
    for user_id in user_ids {
        db::grant_role(conn, user_id, ADMIN_ROLE)?;
        info!("Admin role ensured for {}", user_id);
    }
    Ok(())
}
