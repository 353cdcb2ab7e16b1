use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::core::errors::{AnalysisError, DispatchError};

/// Handler errors and the JSON bodies clients see for them
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Body missing, not JSON, or the wrong shape
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Analysis(AnalysisError::MissingImage) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "No image provided" })),
            )
                .into_response(),
            ApiError::Analysis(AnalysisError::LimitExceeded { kind, limit }) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": kind.user_message(limit),
                    "errorType": kind.as_str(),
                    "limitExceeded": true,
                })),
            )
                .into_response(),
            ApiError::Analysis(e) => {
                error!("Drink analysis failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": format!("Failed to analyze image: {}", e) })),
                )
                    .into_response()
            }
            ApiError::InvalidBody(rejection) => {
                warn!("Rejected request body: {}", rejection);
                (
                    rejection.status(),
                    Json(json!({ "error": rejection.body_text() })),
                )
                    .into_response()
            }
            ApiError::Dispatch(e) => {
                error!("Reminder run failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
