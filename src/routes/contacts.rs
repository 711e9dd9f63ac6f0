use crate::database::contacts;
use crate::error::ApiError;
use crate::models::{Contact, DataResponse};
use crate::routes::helpers::load_account;
use crate::routes::params::ContactQueryParams;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::SqlitePool;

/// Recipient autocomplete, most frequently contacted first.
#[openapi(tag = "Contacts")]
#[get("/accounts/<account_id>/contacts?<params..>")]
pub async fn search_contacts(
    account_id: i64,
    params: ContactQueryParams,
    pool: &State<SqlitePool>,
) -> Result<Json<DataResponse<Vec<Contact>>>, ApiError> {
    load_account(pool.inner(), account_id).await?;
    let data =
        contacts::search_contacts(pool.inner(), account_id, params.q.as_deref(), params.limit()).await?;
    Ok(Json(DataResponse { data }))
}
