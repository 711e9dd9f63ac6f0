use crate::error::ApiError;
use crate::models::{DataResponse, Draft, DraftInput, join_addresses, now_millis};
use crate::routes::helpers::{ensure_positive, load_account};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;

const DRAFT_COLUMNS: &str = "id, account_id, to_addresses, cc_addresses, bcc_addresses, subject, \
body, in_reply_to, thread_id, created_at, updated_at";

async fn load_draft(pool: &SqlitePool, draft_id: i64) -> Result<Draft, ApiError> {
    ensure_positive(draft_id, "draft id")?;
    sqlx::query_as::<_, Draft>(&format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?"))
        .bind(draft_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Draft {draft_id} not found")))
}

#[openapi(tag = "Drafts")]
#[get("/accounts/<account_id>/drafts")]
pub async fn list_drafts(
    account_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Draft>>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let data = sqlx::query_as::<_, Draft>(&format!(
        "SELECT {DRAFT_COLUMNS} FROM drafts WHERE account_id = ? ORDER BY updated_at DESC, id DESC"
    ))
    .bind(account_id)
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(DataResponse { data }))
}

#[openapi(tag = "Drafts")]
#[post("/drafts", data = "<draft>")]
pub async fn create_draft(
    draft: Json<DraftInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Draft>, ApiError> {
    load_account(pool.inner(), draft.account_id).await?;
    let now = now_millis();

    let id = sqlx::query(
        r#"INSERT INTO drafts (account_id, to_addresses, cc_addresses, bcc_addresses, subject, body,
                               in_reply_to, thread_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(draft.account_id)
    .bind(join_addresses(&draft.to))
    .bind(join_addresses(&draft.cc))
    .bind(join_addresses(&draft.bcc))
    .bind(&draft.subject)
    .bind(&draft.body)
    .bind(&draft.in_reply_to)
    .bind(&draft.thread_id)
    .bind(now)
    .bind(now)
    .execute(pool.inner())
    .await?
    .last_insert_rowid();

    Ok(Json(load_draft(pool.inner(), id).await?))
}

#[openapi(tag = "Drafts")]
#[get("/drafts/<draft_id>")]
pub async fn get_draft(draft_id: i64, pool: &State<SqlitePool>) -> Result<Json<Draft>, ApiError> {
    Ok(Json(load_draft(pool.inner(), draft_id).await?))
}

/// Replace the draft contents. The owning account cannot change.
#[openapi(tag = "Drafts")]
#[put("/drafts/<draft_id>", data = "<draft>")]
pub async fn update_draft(
    draft_id: i64,
    draft: Json<DraftInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Draft>, ApiError> {
    let existing = load_draft(pool.inner(), draft_id).await?;
    if draft.account_id != 0 && draft.account_id != existing.account_id {
        return Err(ApiError::BadRequest(
            "a draft cannot be moved to another account".to_string(),
        ));
    }

    sqlx::query(
        r#"UPDATE drafts
           SET to_addresses = ?, cc_addresses = ?, bcc_addresses = ?, subject = ?, body = ?,
               in_reply_to = ?, thread_id = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(join_addresses(&draft.to))
    .bind(join_addresses(&draft.cc))
    .bind(join_addresses(&draft.bcc))
    .bind(&draft.subject)
    .bind(&draft.body)
    .bind(&draft.in_reply_to)
    .bind(&draft.thread_id)
    .bind(now_millis())
    .bind(draft_id)
    .execute(pool.inner())
    .await?;

    Ok(Json(load_draft(pool.inner(), draft_id).await?))
}

#[openapi(tag = "Drafts")]
#[delete("/drafts/<draft_id>")]
pub async fn delete_draft(draft_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    load_draft(pool.inner(), draft_id).await?;
    sqlx::query("DELETE FROM drafts WHERE id = ?")
        .bind(draft_id)
        .execute(pool.inner())
        .await?;
    Ok(Status::NoContent)
}
