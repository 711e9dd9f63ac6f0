//! Per-account signatures. At most one signature per account is the default.

use crate::error::ApiError;
use crate::models::{DataResponse, Signature, SignatureInput, now_millis};
use crate::routes::helpers::{ensure_positive, load_account};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::{SqliteConnection, SqlitePool};

const SIGNATURE_COLUMNS: &str = "id, account_id, name, body, is_default, created_at, updated_at";

async fn load_signature(pool: &SqlitePool, signature_id: i64) -> Result<Signature, ApiError> {
    ensure_positive(signature_id, "signature id")?;
    sqlx::query_as::<_, Signature>(&format!(
        "SELECT {SIGNATURE_COLUMNS} FROM signatures WHERE id = ?"
    ))
    .bind(signature_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Signature {signature_id} not found")))
}

async fn clear_default(conn: &mut SqliteConnection, account_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE signatures SET is_default = 0 WHERE account_id = ? AND is_default = 1")
        .bind(account_id)
        .execute(conn)
        .await?;
    Ok(())
}

fn validate(signature: &SignatureInput) -> Result<(), ApiError> {
    if signature.name.trim().is_empty() {
        return Err(ApiError::BadRequest("signature name must not be empty".to_string()));
    }
    Ok(())
}

#[openapi(tag = "Signatures")]
#[get("/accounts/<account_id>/signatures")]
pub async fn list_signatures(
    account_id: i64,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Signature>>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let data = sqlx::query_as::<_, Signature>(&format!(
        "SELECT {SIGNATURE_COLUMNS} FROM signatures WHERE account_id = ? ORDER BY is_default DESC, name"
    ))
    .bind(account_id)
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(DataResponse { data }))
}

#[openapi(tag = "Signatures")]
#[post("/accounts/<account_id>/signatures", data = "<signature>")]
pub async fn create_signature(
    account_id: i64,
    signature: Json<SignatureInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Signature>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    validate(&signature)?;
    let now = now_millis();

    let mut tx = pool.begin().await?;
    if signature.is_default {
        clear_default(&mut *tx, account_id).await?;
    }
    let id = sqlx::query(
        r#"INSERT INTO signatures (account_id, name, body, is_default, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(account_id)
    .bind(signature.name.trim())
    .bind(&signature.body)
    .bind(signature.is_default)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    tx.commit().await?;

    Ok(Json(load_signature(pool.inner(), id).await?))
}

#[openapi(tag = "Signatures")]
#[put("/signatures/<signature_id>", data = "<signature>")]
pub async fn update_signature(
    signature_id: i64,
    signature: Json<SignatureInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Signature>, ApiError> {
    let existing = load_signature(pool.inner(), signature_id).await?;
    validate(&signature)?;

    let mut tx = pool.begin().await?;
    if signature.is_default {
        clear_default(&mut *tx, existing.account_id).await?;
    }
    sqlx::query("UPDATE signatures SET name = ?, body = ?, is_default = ?, updated_at = ? WHERE id = ?")
        .bind(signature.name.trim())
        .bind(&signature.body)
        .bind(signature.is_default)
        .bind(now_millis())
        .bind(signature_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(load_signature(pool.inner(), signature_id).await?))
}

#[openapi(tag = "Signatures")]
#[delete("/signatures/<signature_id>")]
pub async fn delete_signature(signature_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    load_signature(pool.inner(), signature_id).await?;
    sqlx::query("DELETE FROM signatures WHERE id = ?")
        .bind(signature_id)
        .execute(pool.inner())
        .await?;
    Ok(Status::NoContent)
}
