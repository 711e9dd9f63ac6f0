use crate::providers::ProviderError;
use crate::sync::SyncError;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    DatabaseError(sqlx::Error),
    NotFound(String),
    BadRequest(String),
    Provider(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => Status::InternalServerError,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Provider(_) => Status::BadGateway,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = match self {
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                e.to_string()
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                msg
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                msg
            }
            ApiError::Provider(msg) => {
                log::warn!("provider error: {}", msg);
                msg
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                msg
            }
        };

        let json = serde_json::to_string(&ErrorResponse { error: message })
            .unwrap_or_else(|_| r#"{"error":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Validation failure"),
            ("404", "Resource not found"),
            ("500", "Database or internal failure"),
            ("502", "Mail provider rejected the request"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::AccountNotFound(id) => ApiError::NotFound(format!("Account {id} not found")),
            SyncError::Database(e) => ApiError::from(e),
            SyncError::Provider(e) => ApiError::from(e),
        }
    }
}
