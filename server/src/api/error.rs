use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Lookup miss on a caller-supplied identifier
pub fn not_found(message: impl Into<String>) -> ApiError {
    let message = message.into();
    debug!(%message, "Not found");
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message }))
}

/// Data the endpoint depends on has not been produced yet
pub fn unavailable(message: impl Into<String>) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}
