//! Shared helper functions for Rocket route handlers.

use crate::database::{accounts, emails};
use crate::error::ApiError;
use crate::models::{Account, Email};
use crate::providers::{MailProvider, ProviderFactory};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Reject zero and negative ids before touching the database.
pub fn ensure_positive(id: i64, what: &str) -> Result<(), ApiError> {
    if id > 0 {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("{what} must be a positive integer")))
    }
}

/// Load an account or fail with [`ApiError::NotFound`].
pub async fn load_account(pool: &SqlitePool, account_id: i64) -> Result<Account, ApiError> {
    ensure_positive(account_id, "account id")?;
    accounts::fetch_account(pool, account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Account {account_id} not found")))
}

pub async fn load_email(pool: &SqlitePool, email_id: i64) -> Result<Email, ApiError> {
    ensure_positive(email_id, "email id")?;
    emails::fetch_email(pool, email_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Email {email_id} not found")))
}

/// Provider client for the account that owns `email`, or `None` when the
/// message only exists locally.
pub async fn provider_for_email(
    pool: &SqlitePool,
    providers: &Arc<dyn ProviderFactory>,
    email: &Email,
) -> Result<Option<Arc<dyn MailProvider>>, ApiError> {
    if email.provider_id.starts_with(emails::LOCAL_PROVIDER_PREFIX) {
        return Ok(None);
    }
    let account = load_account(pool, email.account_id).await?;
    Ok(Some(providers.for_account(&account)?))
}

/// Map a unique-constraint violation to a 400 with `message`.
pub fn conflict_as_bad_request(err: sqlx::Error, message: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::BadRequest(message.to_string()),
        _ => ApiError::from(err),
    }
}
