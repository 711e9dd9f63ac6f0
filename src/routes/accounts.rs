//! Connected mail accounts.

use crate::database::accounts;
use crate::error::ApiError;
use crate::idle::IdleManager;
use crate::importance;
use crate::models::{Account, DataResponse, NewAccount, ProviderKind};
use crate::routes::helpers::{conflict_as_bad_request, ensure_positive, load_account};
use crate::sync::{SyncReport, SyncService};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReclassifyResponse {
    pub account_id: i64,
    /// Inbox messages whose Split Inbox half changed.
    pub changed: u64,
}

fn has_value(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Check the credentials a provider kind needs are present.
fn validate_new_account(provider: ProviderKind, account: &NewAccount) -> Result<(), ApiError> {
    let email = account.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email address is required".to_string()));
    }

    match provider {
        ProviderKind::Gmail | ProviderKind::Microsoft if !has_value(&account.access_token) => Err(
            ApiError::BadRequest(format!("{provider} accounts require an accessToken")),
        ),
        ProviderKind::Imap if !has_value(&account.imap_host) || !has_value(&account.smtp_host) => Err(
            ApiError::BadRequest("imap accounts require imapHost and smtpHost".to_string()),
        ),
        ProviderKind::Imap | ProviderKind::Yahoo if !has_value(&account.password) => Err(
            ApiError::BadRequest(format!("{provider} accounts require a password")),
        ),
        _ => Ok(()),
    }
}

#[openapi(tag = "Accounts")]
#[get("/accounts")]
pub async fn list_accounts(
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Account>>>, ApiError> {
    let data = accounts::list_accounts(pool.inner()).await?;
    Ok(Json(DataResponse { data }))
}

/// Connect an account. IMAP and Yahoo accounts start an IDLE watcher.
#[openapi(tag = "Accounts")]
#[post("/accounts", data = "<request>")]
pub async fn create_account(
    request: Json<NewAccount>,
    pool: &State<SqlitePool>,
    idle: &State<Arc<IdleManager>>,
) -> Result<Json<Account>, ApiError> {
    let provider: ProviderKind = request
        .provider
        .parse()
        .map_err(ApiError::BadRequest)?;
    validate_new_account(provider, &request)?;

    let account = accounts::insert_account(pool.inner(), provider, &request)
        .await
        .map_err(|e| conflict_as_bad_request(e, "an account with this email already exists"))?;
    log::info!("account {}: connected {} ({})", account.id, account.email, provider);

    idle.watch(&account);
    Ok(Json(account))
}

#[openapi(tag = "Accounts")]
#[get("/accounts/<account_id>")]
pub async fn get_account(account_id: i64, pool: &State<SqlitePool>) -> Result<Json<Account>, ApiError> {
    Ok(Json(load_account(pool.inner(), account_id).await?))
}

/// Disconnect an account and delete everything stored for it.
#[openapi(tag = "Accounts")]
#[delete("/accounts/<account_id>")]
pub async fn delete_account(
    account_id: i64,
    pool: &State<SqlitePool>,
    idle: &State<Arc<IdleManager>>,
    sync: &State<Arc<SyncService>>,
) -> Result<Status, ApiError> {
    ensure_positive(account_id, "account id")?;
    idle.unwatch(account_id);

    if !accounts::delete_account(pool.inner(), account_id).await? {
        return Err(ApiError::NotFound(format!("Account {account_id} not found")));
    }
    sync.forget(account_id);
    log::info!("account {}: deleted", account_id);

    Ok(Status::NoContent)
}

/// Pull new mail from the provider now.
#[openapi(tag = "Accounts")]
#[post("/accounts/<account_id>/sync")]
pub async fn sync_account(
    account_id: i64,
    sync: &State<Arc<SyncService>>,
) -> Result<Json<SyncReport>, ApiError> {
    ensure_positive(account_id, "account id")?;
    Ok(Json(sync.sync_account(account_id).await?))
}

/// Re-score the whole inbox, e.g. after sender statistics changed a lot.
#[openapi(tag = "Accounts")]
#[post("/accounts/<account_id>/reclassify")]
pub async fn reclassify_account(
    account_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<ReclassifyResponse>, ApiError> {
    let account = load_account(pool.inner(), account_id).await?;
    let changed = importance::reclassify_account(pool.inner(), account.id, &account.email).await?;
    log::info!("account {}: reclassified inbox, {} changed", account_id, changed);
    Ok(Json(ReclassifyResponse { account_id, changed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(provider: &str) -> NewAccount {
        NewAccount {
            provider: provider.to_string(),
            email: "me@example.com".into(),
            display_name: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            imap_host: None,
            imap_port: None,
            smtp_host: None,
            smtp_port: None,
            username: None,
            password: None,
        }
    }

    #[test]
    fn oauth_providers_need_a_token() {
        let account = new_account("gmail");
        assert!(validate_new_account(ProviderKind::Gmail, &account).is_err());

        let account = NewAccount {
            access_token: Some("ya29.token".into()),
            ..new_account("gmail")
        };
        assert!(validate_new_account(ProviderKind::Gmail, &account).is_ok());
    }

    #[test]
    fn yahoo_only_needs_a_password() {
        let account = NewAccount {
            password: Some("app-password".into()),
            ..new_account("yahoo")
        };
        assert!(validate_new_account(ProviderKind::Yahoo, &account).is_ok());
        assert!(validate_new_account(ProviderKind::Imap, &account).is_err());
    }
}
