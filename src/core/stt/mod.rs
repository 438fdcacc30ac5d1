//! # Speech Recognition Seam
//!
//! Recognition backends live behind the [`SpeechToText`] trait. Only audio
//! triggers touch this seam; typed input never does. The shipped adapter
//! posts captured clips to a whisper.cpp-style `/inference` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Recognition error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("transcription request failed: {0}")]
    Request(String),

    #[error("transcription backend returned status {0}")]
    Status(u16),
}

/// Result type for recognition operations.
pub type SttResult<T> = Result<T, SttError>;

/// Base trait for speech-to-text backends.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes a WAV clip into text. Empty text is a valid result.
    async fn transcribe(&self, audio: &[u8]) -> SttResult<String>;
}

#[derive(Debug, Clone)]
pub struct HttpTranscriberConfig {
    pub base_url: String,
    pub language: String,
    pub request_timeout: Duration,
}

impl Default for HttpTranscriberConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8178".to_string(),
            language: "en".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Client for a whisper-server `POST /inference` endpoint.
pub struct HttpTranscriber {
    config: HttpTranscriberConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl HttpTranscriber {
    pub fn new(config: HttpTranscriberConfig) -> SttResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SttError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SpeechToText for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> SttResult<String> {
        let url = format!("{}/inference", self.config.base_url.trim_end_matches('/'));

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", self.config.language.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SttError::Status(response.status().as_u16()));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}
