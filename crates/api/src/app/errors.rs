//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use sheetgate_pipeline::{IntakeError, ServiceError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        ServiceError::Cancelled => {
            json_error(StatusCode::GONE, "cancelled", err.to_string())
        }
        ServiceError::PaymentRequired => {
            json_error(StatusCode::PAYMENT_REQUIRED, "payment_required", err.to_string())
        }
        ServiceError::Conflict => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        ServiceError::ArtifactGone => json_error(StatusCode::GONE, "gone", err.to_string()),
        ServiceError::Upstream(msg) => json_error(StatusCode::BAD_GATEWAY, "upstream_error", msg),
        ServiceError::Store(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    match err {
        IntakeError::BlobDisabled => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "blob_disabled", err.to_string())
        }
        IntakeError::Upload(msg) => json_error(StatusCode::BAD_GATEWAY, "upload_failed", msg),
        IntakeError::Store(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        IntakeError::Enqueue(msg) => json_error(StatusCode::BAD_GATEWAY, "enqueue_failed", msg),
    }
}
