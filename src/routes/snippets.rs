//! Reusable text snippets, shared by every account and expanded by shortcut.

use crate::error::ApiError;
use crate::models::{DataResponse, Snippet, SnippetInput, now_millis};
use crate::routes::helpers::{conflict_as_bad_request, ensure_positive};
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;

const DUPLICATE_SHORTCUT: &str = "a snippet with this shortcut already exists";

fn validate(snippet: &SnippetInput) -> Result<(), ApiError> {
    if snippet.shortcut.trim().is_empty() {
        return Err(ApiError::BadRequest("shortcut must not be empty".to_string()));
    }
    if snippet.shortcut.trim().contains(char::is_whitespace) {
        return Err(ApiError::BadRequest("shortcut must not contain spaces".to_string()));
    }
    if snippet.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    Ok(())
}

async fn load_snippet(pool: &SqlitePool, snippet_id: i64) -> Result<Snippet, ApiError> {
    ensure_positive(snippet_id, "snippet id")?;
    sqlx::query_as::<_, Snippet>(
        "SELECT id, shortcut, title, body, created_at, updated_at FROM snippets WHERE id = ?",
    )
    .bind(snippet_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Snippet {snippet_id} not found")))
}

#[openapi(tag = "Snippets")]
#[get("/snippets")]
pub async fn list_snippets(pool: &State<SqlitePool>) -> Result<Json<DataResponse<Vec<Snippet>>>, ApiError> {
    let data = sqlx::query_as::<_, Snippet>(
        "SELECT id, shortcut, title, body, created_at, updated_at FROM snippets ORDER BY shortcut",
    )
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(DataResponse { data }))
}

#[openapi(tag = "Snippets")]
#[post("/snippets", data = "<snippet>")]
pub async fn create_snippet(
    snippet: Json<SnippetInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Snippet>, ApiError> {
    validate(&snippet)?;
    let now = now_millis();

    let id = sqlx::query(
        "INSERT INTO snippets (shortcut, title, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(snippet.shortcut.trim())
    .bind(snippet.title.trim())
    .bind(&snippet.body)
    .bind(now)
    .bind(now)
    .execute(pool.inner())
    .await
    .map_err(|e| conflict_as_bad_request(e, DUPLICATE_SHORTCUT))?
    .last_insert_rowid();

    Ok(Json(load_snippet(pool.inner(), id).await?))
}

#[openapi(tag = "Snippets")]
#[put("/snippets/<snippet_id>", data = "<snippet>")]
pub async fn update_snippet(
    snippet_id: i64,
    snippet: Json<SnippetInput>,
    pool: &State<SqlitePool>,
) -> Result<Json<Snippet>, ApiError> {
    load_snippet(pool.inner(), snippet_id).await?;
    validate(&snippet)?;

    sqlx::query("UPDATE snippets SET shortcut = ?, title = ?, body = ?, updated_at = ? WHERE id = ?")
        .bind(snippet.shortcut.trim())
        .bind(snippet.title.trim())
        .bind(&snippet.body)
        .bind(now_millis())
        .bind(snippet_id)
        .execute(pool.inner())
        .await
        .map_err(|e| conflict_as_bad_request(e, DUPLICATE_SHORTCUT))?;

    Ok(Json(load_snippet(pool.inner(), snippet_id).await?))
}

#[openapi(tag = "Snippets")]
#[delete("/snippets/<snippet_id>")]
pub async fn delete_snippet(snippet_id: i64, pool: &State<SqlitePool>) -> Result<Status, ApiError> {
    load_snippet(pool.inner(), snippet_id).await?;
    sqlx::query("DELETE FROM snippets WHERE id = ?")
        .bind(snippet_id)
        .execute(pool.inner())
        .await?;
    Ok(Status::NoContent)
}
