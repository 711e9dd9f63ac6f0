//! User labels and their assignment to emails.

use crate::error::ApiError;
use crate::models::{DataResponse, Label, NewLabel, now_millis};
use crate::routes::helpers::{conflict_as_bad_request, ensure_positive, load_account, load_email};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;

async fn load_label(pool: &SqlitePool, label_id: i64) -> Result<Label, ApiError> {
    ensure_positive(label_id, "label id")?;
    sqlx::query_as::<_, Label>(
        "SELECT id, account_id, name, color, created_at FROM labels WHERE id = ?",
    )
    .bind(label_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Label {label_id} not found")))
}

#[openapi(tag = "Labels")]
#[get("/accounts/<account_id>/labels")]
pub async fn list_labels(
    account_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Label>>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let data = sqlx::query_as::<_, Label>(
        "SELECT id, account_id, name, color, created_at FROM labels WHERE account_id = ? ORDER BY name",
    )
    .bind(account_id)
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(DataResponse { data }))
}

#[openapi(tag = "Labels")]
#[post("/accounts/<account_id>/labels", data = "<label>")]
pub async fn create_label(
    account_id: i64,
    label: Json<NewLabel>,
    pool: &State<SqlitePool>,
) -> Result<Json<Label>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let name = label.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("label name must not be empty".to_string()));
    }

    let id = sqlx::query("INSERT INTO labels (account_id, name, color, created_at) VALUES (?, ?, ?, ?)")
        .bind(account_id)
        .bind(name)
        .bind(&label.color)
        .bind(now_millis())
        .execute(pool.inner())
        .await
        .map_err(|e| conflict_as_bad_request(e, "a label with this name already exists"))?
        .last_insert_rowid();

    Ok(Json(load_label(pool.inner(), id).await?))
}

#[openapi(tag = "Labels")]
#[delete("/labels/<label_id>")]
pub async fn delete_label(label_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    load_label(pool.inner(), label_id).await?;
    sqlx::query("DELETE FROM labels WHERE id = ?")
        .bind(label_id)
        .execute(pool.inner())
        .await?;
    Ok(Status::NoContent)
}

#[openapi(tag = "Labels")]
#[get("/emails/<email_id>/labels")]
pub async fn email_labels(
    email_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Label>>>, ApiError> {
    load_email(pool.inner(), email_id).await?;
    let data = sqlx::query_as::<_, Label>(
        r#"SELECT l.id, l.account_id, l.name, l.color, l.created_at
           FROM labels l
           JOIN email_labels el ON el.label_id = l.id
           WHERE el.email_id = ?
           ORDER BY l.name"#,
    )
    .bind(email_id)
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(DataResponse { data }))
}

/// Attach a label. Labels only apply to emails of the same account.
#[openapi(tag = "Labels")]
#[put("/emails/<email_id>/labels/<label_id>")]
pub async fn add_email_label(
    email_id: i64,
    label_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Status, ApiError> {
    let email = load_email(pool.inner(), email_id).await?;
    let label = load_label(pool.inner(), label_id).await?;
    if email.account_id != label.account_id {
        return Err(ApiError::BadRequest(
            "label belongs to a different account".to_string(),
        ));
    }

    sqlx::query("INSERT OR IGNORE INTO email_labels (email_id, label_id) VALUES (?, ?)")
        .bind(email_id)
        .bind(label_id)
        .execute(pool.inner())
        .await?;
    Ok(Status::NoContent)
}

#[openapi(tag = "Labels")]
#[delete("/emails/<email_id>/labels/<label_id>")]
pub async fn remove_email_label(
    email_id: i64,
    label_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Status, ApiError> {
    ensure_positive(email_id, "email id")?;
    ensure_positive(label_id, "label id")?;
    let removed = sqlx::query("DELETE FROM email_labels WHERE email_id = ? AND label_id = ?")
        .bind(email_id)
        .bind(label_id)
        .execute(pool.inner())
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::NotFound(format!(
            "Label {label_id} is not applied to email {email_id}"
        )));
    }
    Ok(Status::NoContent)
}
