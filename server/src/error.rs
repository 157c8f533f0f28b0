use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use speech_core::SpeechError;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Speech(SpeechError::Busy) => {
                (StatusCode::CONFLICT, SpeechError::Busy.to_string())
            }
            ApiError::Speech(e @ SpeechError::Canceled(_)) => {
                tracing::warn!("Synthesis canceled: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            ApiError::Speech(e) => {
                tracing::error!("Speech error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Speech error: {}", e))
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message.clone(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
