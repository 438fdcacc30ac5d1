use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::core::tts::SynthError;

/// Error type for the REST surface.
///
/// The WebSocket protocol reports its failures in-band as `error` messages;
/// this type only covers the plain HTTP endpoints, so it carries exactly the
/// failures those endpoints can produce: a rejected request body or an
/// upstream synthesis failure.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Synthesis(#[from] SynthError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => {
                tracing::warn!("bad request: {msg}");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::Synthesis(err) => {
                tracing::error!("synthesis failed: {err}");
                // The backend's own status codes are not forwarded; to the
                // caller this is an unavailable upstream.
                (
                    StatusCode::BAD_GATEWAY,
                    "speech backend unavailable".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
