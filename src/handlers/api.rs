use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status
    pub status: String,
}

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Result<Json<HealthResponse>, StatusCode> {
    Ok(Json(HealthResponse {
        status: "OK".to_string(),
    }))
}

/// Request body for the speak endpoint
#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    /// The text to synthesize
    pub text: String,
}

/// Response body for the speak endpoint
#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    /// Base64-encoded audio
    pub audio: String,
    pub format: String,
    pub sample_rate: u32,
}

/// One-shot synthesis endpoint, mainly for voice tuning and smoke tests.
/// Conversation audio never goes through here; it flows over the WebSocket
/// with sequence ordering.
pub async fn speak_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeakRequest>,
) -> AppResult<Json<SpeakResponse>> {
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }

    info!(chars = request.text.len(), "one-shot synthesis requested");
    let audio = state.synthesizer.synthesize(&request.text).await?;

    Ok(Json(SpeakResponse {
        audio: BASE64.encode(&audio.data),
        format: audio.format,
        sample_rate: audio.sample_rate,
    }))
}
