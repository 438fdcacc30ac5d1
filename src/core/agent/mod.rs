//! # Agent Engine Seam
//!
//! The orchestrator consumes language-model backends through the
//! [`AgentEngine`] trait: a request goes in, a lazy stream of sentence,
//! tool-status, and pre-rendered audio outputs comes back. Backends live
//! behind this seam so the turn flows never know which provider produced
//! the text.
//!
//! Dropping an [`AgentStream`] cancels generation; interrupted turns also
//! call [`AgentEngine::handle_interrupt`] so the backend can record where
//! the response was cut off.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub mod openai;
pub mod segment;
pub mod speech_filter;

pub use openai::{OpenAiAgent, OpenAiAgentConfig};
pub use segment::{SentenceSegmenter, segment_text};
pub use speech_filter::speech_filter;

/// Avatar hints attached to a sentence (expression/emotion tags).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
}

/// One sentence produced by the agent in stream order.
///
/// `display_text` is what the user sees; `tts_text` is what reaches the
/// synthesizer (stage directions stripped). The delivery sequence number is
/// assigned later, by the TTS manager, not here.
#[derive(Debug, Clone)]
pub struct SentenceOutput {
    pub display_text: String,
    pub tts_text: String,
    pub actions: Option<Actions>,
}

impl SentenceOutput {
    /// Builds a sentence whose synthesis text is the filtered display text.
    pub fn from_display(display_text: impl Into<String>) -> Self {
        let display_text = display_text.into();
        let tts_text = speech_filter(&display_text);
        Self {
            display_text,
            tts_text,
            actions: None,
        }
    }
}

/// Audio the agent rendered itself, bypassing synthesis but not ordering.
#[derive(Debug, Clone)]
pub struct AudioOutput {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub display_text: String,
    pub actions: Option<Actions>,
}

/// Progress of a tool invocation, forwarded verbatim to the client UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStatus {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One item of the agent's lazy output sequence.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    Sentence(SentenceOutput),
    ToolStatus(ToolCallStatus),
    Audio(AudioOutput),
}

/// One prior exchange entry for the chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Everything the engine needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub user_text: String,
    /// Retrieved memory fragments or unread group lines, already formatted.
    pub context_block: String,
    /// Recent history, oldest first.
    pub history: Vec<ChatMessage>,
    /// Display name of the responding participant (group mode).
    pub speaker: Option<String>,
}

/// Agent backend errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Request(String),

    #[error("agent returned status {0}")]
    Status(u16),

    #[error("agent stream ended abnormally: {0}")]
    Stream(String),

    #[error("agent not configured: {0}")]
    NotConfigured(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Lazy sequence of agent outputs. Dropping the stream cancels generation.
pub type AgentStream = Pin<Box<dyn Stream<Item = AgentResult<AgentOutput>> + Send>>;

/// Base trait for language-model backends.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Starts one generation. Outputs arrive in producer order.
    async fn chat(&self, request: AgentRequest) -> AgentResult<AgentStream>;

    /// Lets the engine record that generation was cut short at `partial_text`.
    async fn handle_interrupt(&self, _partial_text: &str) {}
}
