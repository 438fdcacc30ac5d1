//! HTTP synthesis adapter.
//!
//! POSTs text to a speech endpoint and returns the audio bytes. Raw PCM
//! responses are wrapped in a WAV container so clients can hand the payload
//! straight to an audio element.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{AudioData, SpeechSynthesizer, SynthError, SynthResult};

#[derive(Debug, Clone)]
pub struct HttpSynthesizerConfig {
    pub base_url: String,
    pub voice: String,
    pub sample_rate: u32,
    pub request_timeout: Duration,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8880".to_string(),
            voice: "default".to_string(),
            sample_rate: 24000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Client for a `POST /synthesize` speech endpoint.
pub struct HttpSynthesizer {
    config: HttpSynthesizerConfig,
    client: Client,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> SynthResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SynthError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> SynthResult<AudioData> {
        let url = format!("{}/synthesize", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "text": text,
                "voice": self.config.voice,
                "sample_rate": self.config.sample_rate,
            }))
            .send()
            .await
            .map_err(|e| SynthError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SynthError::Status(response.status().as_u16()));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| SynthError::Request(e.to_string()))?
            .to_vec();
        if data.is_empty() {
            let preview: String = text.chars().take(40).collect();
            return Err(SynthError::EmptyAudio(preview));
        }

        debug!(bytes = data.len(), "synthesis response received");

        let data = if looks_like_wav(&data) {
            data
        } else {
            pcm_to_wav(&data, self.config.sample_rate, 1)
        };

        Ok(AudioData {
            data,
            sample_rate: self.config.sample_rate,
            format: "wav".to_string(),
        })
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

fn looks_like_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Wraps 16-bit little-endian PCM in a minimal RIFF/WAVE container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_size = pcm.len() as u32;
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let block_align = channels * 2;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
