//! # Speech Synthesis Seam
//!
//! Synthesis backends live behind the [`SpeechSynthesizer`] trait: text in,
//! audio bytes out. The ordered TTS manager runs many `synthesize` calls in
//! parallel and re-serializes their results, so implementations must be
//! cancel-safe: dropping the future aborts the request.

use async_trait::async_trait;

pub mod http;

pub use http::{HttpSynthesizer, HttpSynthesizerConfig, pcm_to_wav};

/// Synthesized audio returned by a backend.
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Audio bytes in the container named by `format`.
    pub data: Vec<u8>,
    pub sample_rate: u32,
    /// Container/encoding, e.g. "wav" or "pcm".
    pub format: String,
}

/// Synthesis error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthError {
    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis backend returned status {0}")]
    Status(u16),

    #[error("synthesis produced no audio for: {0}")]
    EmptyAudio(String),
}

/// Result type for synthesis operations.
pub type SynthResult<T> = Result<T, SynthError>;

/// Base trait for text-to-speech backends.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Renders `text` to audio. One call per sentence chunk.
    async fn synthesize(&self, text: &str) -> SynthResult<AudioData>;

    /// Output sample rate clients should expect.
    fn sample_rate(&self) -> u32;
}
