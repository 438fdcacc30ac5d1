//! OpenAI-compatible streaming chat adapter.
//!
//! Works against any `/chat/completions` endpoint that speaks the OpenAI
//! wire format (OpenRouter, LM Studio, vLLM, ...). Token deltas are
//! aggregated into sentences before they reach the orchestrator, so the
//! turn flows only ever see [`AgentOutput::Sentence`] items from this
//! backend.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::segment::SentenceSegmenter;
use super::{
    AgentEngine, AgentError, AgentOutput, AgentRequest, AgentResult, AgentStream, SentenceOutput,
};

/// Adapter configuration. `base_url` points at the provider's `/v1` root.
#[derive(Debug, Clone)]
pub struct OpenAiAgentConfig {
    pub base_url: String,
    /// Bearer token; empty for local endpoints that need none.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub system_prompt: String,
    pub sentence_max_chars: usize,
    pub request_timeout: Duration,
}

impl Default for OpenAiAgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: String::new(),
            model: "default".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            system_prompt: "You are Aria, a friendly real-time voice assistant.".to_string(),
            sentence_max_chars: 150,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Streaming chat client for OpenAI-compatible providers.
pub struct OpenAiAgent {
    config: OpenAiAgentConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiAgentConfig) -> AgentResult<Self> {
        if config.base_url.is_empty() {
            return Err(AgentError::NotConfigured("agent base_url is empty".into()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn build_messages(&self, request: &AgentRequest) -> Vec<Value> {
        let mut system = self.config.system_prompt.clone();
        if let Some(speaker) = &request.speaker {
            system.push_str(&format!("\nYou are speaking as {speaker}."));
        }
        if !request.context_block.is_empty() {
            system.push_str("\n\n");
            system.push_str(&request.context_block);
        }

        let mut messages = vec![json!({"role": "system", "content": system})];
        for entry in &request.history {
            messages.push(json!({"role": entry.role, "content": entry.content}));
        }
        messages.push(json!({"role": "user", "content": request.user_text}));
        messages
    }
}

#[async_trait::async_trait]
impl AgentEngine for OpenAiAgent {
    async fn chat(&self, request: AgentRequest) -> AgentResult<AgentStream> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "messages": self.build_messages(&request),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "stream": true,
        });

        let mut http_request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.config.api_key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| AgentError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AgentError::Status(response.status().as_u16()));
        }

        let (tx, rx) = mpsc::channel::<AgentResult<AgentOutput>>(32);
        let max_chars = self.config.sentence_max_chars;

        // The reader task dies when the receiver is dropped (turn cancelled).
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut segmenter = SentenceSegmenter::new(max_chars);
            let mut pending = String::new();
            let started = Instant::now();
            let mut first_token = true;

            'body: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(AgentError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'body;
                    }
                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    let Some(content) = parsed
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.as_deref())
                    else {
                        continue;
                    };

                    if first_token {
                        info!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "agent first token"
                        );
                        first_token = false;
                    }
                    for sentence in segmenter.push(content) {
                        let output = AgentOutput::Sentence(SentenceOutput::from_display(sentence));
                        if tx.send(Ok(output)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Some(rest) = segmenter.flush() {
                let output = AgentOutput::Sentence(SentenceOutput::from_display(rest));
                let _ = tx.send(Ok(output)).await;
            }
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "agent generation complete"
            );
        });

        Ok(Box::pin(ReceiverStream { inner: rx }))
    }

    async fn handle_interrupt(&self, partial_text: &str) {
        debug!(chars = partial_text.len(), "generation interrupted");
    }
}

/// Minimal channel-to-stream bridge for the reader task's output.
struct ReceiverStream {
    inner: mpsc::Receiver<AgentResult<AgentOutput>>,
}

impl Stream for ReceiverStream {
    type Item = AgentResult<AgentOutput>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_recv(cx)
    }
}
