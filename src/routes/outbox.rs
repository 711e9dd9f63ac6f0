//! Scheduled sends and undo-window sends.
//!
//! Neither endpoint talks to a provider: rows are picked up by the send
//! processors once they are due.

use crate::config::HambaConfig;
use crate::database::outbox::{self, Outbox};
use crate::error::ApiError;
use crate::models::{ComposeRequest, DataResponse, QueuedMessage, now_millis};
use crate::routes::helpers::{ensure_positive, load_account};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;

async fn validate_compose(pool: &SqlitePool, request: &ComposeRequest) -> Result<(), ApiError> {
    request.validate().map_err(ApiError::BadRequest)?;
    load_account(pool, request.account_id).await?;
    Ok(())
}

#[openapi(tag = "Outbox")]
#[get("/accounts/<account_id>/scheduled")]
pub async fn list_scheduled(
    account_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<QueuedMessage>>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let data = outbox::list_for_account(pool.inner(), Outbox::Scheduled, account_id).await?;
    Ok(Json(DataResponse { data }))
}

/// Queue a message for `sendAt` (epoch millis, must be in the future).
#[openapi(tag = "Outbox")]
#[post("/scheduled", data = "<request>")]
pub async fn schedule_send(
    request: Json<ComposeRequest>,
    pool: &State<SqlitePool>,
) -> Result<Json<QueuedMessage>, ApiError> {
    let send_at = request
        .send_at
        .ok_or_else(|| ApiError::BadRequest("sendAt is required".to_string()))?;
    if send_at <= now_millis() {
        return Err(ApiError::BadRequest("sendAt must be in the future".to_string()));
    }
    validate_compose(pool.inner(), &request).await?;

    let queued = outbox::enqueue(pool.inner(), Outbox::Scheduled, &request, send_at).await?;
    log::info!(
        "account {}: scheduled message {} for {}",
        queued.account_id,
        queued.id,
        send_at
    );
    Ok(Json(queued))
}

#[openapi(tag = "Outbox")]
#[delete("/scheduled/<scheduled_id>")]
pub async fn cancel_scheduled(scheduled_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    ensure_positive(scheduled_id, "scheduled id")?;
    if !outbox::remove(pool.inner(), Outbox::Scheduled, scheduled_id).await? {
        return Err(ApiError::NotFound(format!(
            "Scheduled message {scheduled_id} not found"
        )));
    }
    Ok(Status::NoContent)
}

/// Send with an undo window. The message leaves once the window closes.
#[openapi(tag = "Outbox")]
#[post("/send", data = "<request>")]
pub async fn send(
    request: Json<ComposeRequest>,
    pool: &State<SqlitePool>,
    config: &State<HambaConfig>,
) -> Result<Json<QueuedMessage>, ApiError> {
    validate_compose(pool.inner(), &request).await?;

    let send_after = now_millis() + config.undo_send_millis();
    let queued = outbox::enqueue(pool.inner(), Outbox::Pending, &request, send_after).await?;
    log::info!(
        "account {}: message {} pending until {}",
        queued.account_id,
        queued.id,
        send_after
    );
    Ok(Json(queued))
}

/// Undo a send. Returns the message so the client can reopen it as a draft;
/// 404 means the window already closed.
#[openapi(tag = "Outbox")]
#[delete("/send/<pending_id>")]
pub async fn undo_send(pending_id: i64, pool: &State<SqlitePool>) -> Result<Json<QueuedMessage>, ApiError> {
    ensure_positive(pending_id, "pending send id")?;
    let gone = || ApiError::NotFound(format!("Pending send {pending_id} not found or already sent"));

    let queued = outbox::fetch(pool.inner(), Outbox::Pending, pending_id)
        .await?
        .ok_or_else(gone)?;
    if !outbox::remove(pool.inner(), Outbox::Pending, pending_id).await? {
        return Err(gone());
    }
    log::info!("account {}: send {} undone", queued.account_id, pending_id);
    Ok(Json(queued))
}
