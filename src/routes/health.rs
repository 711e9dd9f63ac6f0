//! Service health endpoint used for readiness checks and tests.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// `ok` when the database answers, `degraded` otherwise.
    pub status: String,
    pub database: bool,
}

#[openapi(tag = "Health")]
#[get("/health")]
pub async fn health_check(pool: &State<SqlitePool>) -> Json<HealthResponse> {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool.inner())
        .await
        .is_ok();

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        database,
    })
}
