//! Mailbox listing, the Split Inbox, and per-message actions.
//!
//! Actions that exist on the provider side (read, star, archive, trash) go
//! to the provider first and only touch the local row once it succeeded, so
//! a 502 leaves the local state as it was.

use crate::database::emails::{self, EmailFilter};
use crate::error::ApiError;
use crate::models::{Attachment, Email, EmailSummary, EmailUpdate, Folder, PaginatedResponse};
use crate::providers::ProviderFactory;
use crate::routes::helpers::{load_account, load_email, provider_for_email};
use crate::routes::params::{EmailListParams, SearchParams};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;
use std::sync::Arc;

/// List a folder, newest first. `split=important|other` selects a Split Inbox half.
#[openapi(tag = "Emails")]
#[get("/accounts/<account_id>/emails?<params..>")]
pub async fn list_emails(
    account_id: i64,
    params: EmailListParams,
    pool: &State<SqlitePool>,
) -> Result<Json<PaginatedResponse<EmailSummary>>, ApiError> {
    load_account(pool.inner(), account_id).await?;

    let pagination = params.pagination();
    let filter = EmailFilter {
        account_id,
        folder: params.folder(),
        split: params.split(),
        unread_only: params.unread,
    };
    let (rows, total) =
        emails::list_emails(pool.inner(), &filter, pagination.page(), pagination.size()).await?;

    Ok(Json(PaginatedResponse::new(
        rows,
        pagination.page(),
        pagination.size(),
        total,
    )))
}

#[openapi(tag = "Emails")]
#[get("/accounts/<account_id>/search?<params..>")]
pub async fn search_emails(
    account_id: i64,
    params: SearchParams,
    pool: &State<SqlitePool>,
) -> Result<Json<PaginatedResponse<EmailSummary>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let query = params
        .query()
        .ok_or_else(|| ApiError::BadRequest("query parameter 'q' is required".to_string()))?;

    let pagination = params.pagination();
    let (rows, total) = emails::search_emails(
        pool.inner(),
        account_id,
        query,
        pagination.page(),
        pagination.size(),
    )
    .await?;

    Ok(Json(PaginatedResponse::new(
        rows,
        pagination.page(),
        pagination.size(),
        total,
    )))
}

#[openapi(tag = "Emails")]
#[get("/emails/<email_id>")]
pub async fn get_email(email_id: i64, pool: &State<SqlitePool>) -> Result<Json<Email>, ApiError> {
    Ok(Json(load_email(pool.inner(), email_id).await?))
}

/// Update read/starred state on the provider, then locally.
#[openapi(tag = "Emails")]
#[patch("/emails/<email_id>", data = "<update>")]
pub async fn update_email(
    email_id: i64,
    update: Json<EmailUpdate>,
    pool: &State<SqlitePool>,
    providers: &State<Arc<dyn ProviderFactory>>,
) -> Result<Json<Email>, ApiError> {
    let email = load_email(pool.inner(), email_id).await?;
    if update.is_read.is_none() && update.is_starred.is_none() {
        return Err(ApiError::BadRequest("nothing to update".to_string()));
    }

    if let Some(provider) = provider_for_email(pool.inner(), providers.inner(), &email).await? {
        if let Some(read) = update.is_read.filter(|read| *read != email.is_read) {
            provider.set_read(&email.provider_id, read).await?;
        }
        if let Some(starred) = update.is_starred.filter(|starred| *starred != email.is_starred) {
            provider.set_starred(&email.provider_id, starred).await?;
        }
    }

    emails::set_flags(pool.inner(), email_id, update.is_read, update.is_starred).await?;
    Ok(Json(load_email(pool.inner(), email_id).await?))
}

#[openapi(tag = "Emails")]
#[post("/emails/<email_id>/archive")]
pub async fn archive_email(
    email_id: i64,
    pool: &State<SqlitePool>,
    providers: &State<Arc<dyn ProviderFactory>>,
) -> Result<Json<Email>, ApiError> {
    let email = load_email(pool.inner(), email_id).await?;
    if email.folder == Folder::Archive {
        return Ok(Json(email));
    }
    if let Some(provider) = provider_for_email(pool.inner(), providers.inner(), &email).await? {
        provider.archive(&email.provider_id).await?;
    }

    emails::move_to_folder(pool.inner(), email_id, Folder::Archive).await?;
    Ok(Json(load_email(pool.inner(), email_id).await?))
}

#[openapi(tag = "Emails")]
#[post("/emails/<email_id>/trash")]
pub async fn trash_email(
    email_id: i64,
    pool: &State<SqlitePool>,
    providers: &State<Arc<dyn ProviderFactory>>,
) -> Result<Json<Email>, ApiError> {
    let email = load_email(pool.inner(), email_id).await?;
    if email.folder == Folder::Trash {
        return Ok(Json(email));
    }
    if let Some(provider) = provider_for_email(pool.inner(), providers.inner(), &email).await? {
        provider.trash(&email.provider_id).await?;
    }

    emails::move_to_folder(pool.inner(), email_id, Folder::Trash).await?;
    Ok(Json(load_email(pool.inner(), email_id).await?))
}

/// Bring a message back from the trash or archive. Local only.
#[openapi(tag = "Emails")]
#[post("/emails/<email_id>/restore")]
pub async fn restore_email(email_id: i64, pool: &State<SqlitePool>) -> Result<Json<Email>, ApiError> {
    let email = load_email(pool.inner(), email_id).await?;
    let folder = if email.is_sent { Folder::Sent } else { Folder::Inbox };

    emails::move_to_folder(pool.inner(), email_id, folder).await?;
    Ok(Json(load_email(pool.inner(), email_id).await?))
}

/// Delete the local copy immediately.
#[openapi(tag = "Emails")]
#[delete("/emails/<email_id>")]
pub async fn delete_email(email_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    load_email(pool.inner(), email_id).await?;
    emails::delete_email(pool.inner(), email_id).await?;
    Ok(Status::NoContent)
}

#[openapi(tag = "Emails")]
#[get("/emails/<email_id>/attachments")]
pub async fn list_attachments(
    email_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<Vec<Attachment>>, ApiError> {
    load_email(pool.inner(), email_id).await?;
    Ok(Json(emails::attachments_for(pool.inner(), email_id).await?))
}

/// Every message of a conversation, oldest first.
#[openapi(tag = "Emails")]
#[get("/threads/<account_id>/<thread_id>")]
pub async fn get_thread(
    account_id: i64,
    thread_id: String,
    pool: &State<SqlitePool>,
) -> Result<Json<Vec<Email>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let messages = emails::thread_emails(pool.inner(), account_id, &thread_id).await?;
    if messages.is_empty() {
        return Err(ApiError::NotFound(format!("Thread '{thread_id}' not found")));
    }
    Ok(Json(messages))
}
