//! # Conversation Memory
//!
//! Persistent history and recall for turn flows. The transcript is
//! line-oriented: every utterance is stored as `"<speaker>: <text>"` and
//! markers such as `[Interrupted by user]` are appended as their own lines,
//! so the on-disk format stays trivially parseable.
//!
//! Recall is a separate index from the transcript: proactive turns skip the
//! recall write without skipping history, and vice versa. Retrieval is
//! lexical (token overlap with a score threshold), good enough to surface
//! "we talked about this" fragments without dragging an embedding model into
//! the server.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::agent::ChatMessage;

/// Memory store error types.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("history file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Base trait for history/recall stores.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn append_user(&self, client: &str, text: &str) -> MemoryResult<()>;

    /// Appends the assistant line, then each marker as its own line.
    async fn append_assistant(&self, client: &str, text: &str, markers: &[&str])
    -> MemoryResult<()>;

    /// Adds one finished exchange to the recall index.
    async fn ingest(&self, client: &str, user_text: &str, assistant_text: &str)
    -> MemoryResult<()>;

    /// Recall fragments relevant to `query`, best first.
    async fn retrieve(&self, client: &str, query: &str) -> MemoryResult<Vec<String>>;

    /// Most recent transcript lines, oldest first.
    async fn recent(&self, client: &str, limit: usize) -> MemoryResult<Vec<String>>;

    /// Most recent transcript as chat request entries, oldest first.
    async fn recent_messages(&self, client: &str, limit: usize) -> MemoryResult<Vec<ChatMessage>>;
}

/// Formats retrieved fragments into a system-prompt block.
pub fn context_block(fragments: &[String]) -> String {
    if fragments.is_empty() {
        return String::new();
    }
    let mut block = String::from("Relevant memory from earlier conversations:");
    for fragment in fragments {
        block.push_str("\n- ");
        block.push_str(fragment);
    }
    block
}

#[derive(Debug, Clone)]
pub struct TranscriptStoreConfig {
    pub user_name: String,
    pub assistant_name: String,
    /// Optional append-only transcript file.
    pub history_path: Option<PathBuf>,
    pub top_k: usize,
    pub score_threshold: f32,
}

impl Default for TranscriptStoreConfig {
    fn default() -> Self {
        Self {
            user_name: "User".to_string(),
            assistant_name: "Aria".to_string(),
            history_path: None,
            top_k: 3,
            score_threshold: 0.3,
        }
    }
}

/// In-memory transcript + recall index with optional file persistence.
pub struct TranscriptStore {
    config: TranscriptStoreConfig,
    lines: RwLock<HashMap<String, Vec<String>>>,
    recall: RwLock<HashMap<String, Vec<String>>>,
}

impl TranscriptStore {
    pub fn new(config: TranscriptStoreConfig) -> Self {
        Self {
            config,
            lines: RwLock::new(HashMap::new()),
            recall: RwLock::new(HashMap::new()),
        }
    }

    /// Full transcript for one client (mainly for tests and diagnostics).
    pub fn transcript(&self, client: &str) -> Vec<String> {
        self.lines.read().get(client).cloned().unwrap_or_default()
    }

    async fn append_line(&self, client: &str, line: String) -> MemoryResult<()> {
        if let Some(path) = &self.config.history_path {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        self.lines
            .write()
            .entry(client.to_string())
            .or_default()
            .push(line);
        Ok(())
    }
}

#[async_trait]
impl ConversationMemory for TranscriptStore {
    async fn append_user(&self, client: &str, text: &str) -> MemoryResult<()> {
        self.append_line(client, format!("{}: {}", self.config.user_name, text))
            .await
    }

    async fn append_assistant(
        &self,
        client: &str,
        text: &str,
        markers: &[&str],
    ) -> MemoryResult<()> {
        self.append_line(client, format!("{}: {}", self.config.assistant_name, text))
            .await?;
        for marker in markers {
            self.append_line(client, (*marker).to_string()).await?;
        }
        Ok(())
    }

    async fn ingest(
        &self,
        client: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> MemoryResult<()> {
        let fragment = format!(
            "{}: {} / {}: {}",
            self.config.user_name, user_text, self.config.assistant_name, assistant_text
        );
        self.recall
            .write()
            .entry(client.to_string())
            .or_default()
            .push(fragment);
        Ok(())
    }

    async fn retrieve(&self, client: &str, query: &str) -> MemoryResult<Vec<String>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let recall = self.recall.read();
        let Some(fragments) = recall.get(client) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &String)> = fragments
            .iter()
            .filter_map(|fragment| {
                let tokens = tokenize(fragment);
                let overlap = query_tokens.intersection(&tokens).count();
                let score = overlap as f32 / query_tokens.len() as f32;
                (score >= self.config.score_threshold).then_some((score, fragment))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let hits: Vec<String> = scored
            .into_iter()
            .take(self.config.top_k)
            .map(|(_, fragment)| fragment.clone())
            .collect();
        debug!(client = %client, hits = hits.len(), "memory retrieval");
        Ok(hits)
    }

    async fn recent(&self, client: &str, limit: usize) -> MemoryResult<Vec<String>> {
        let lines = self.lines.read();
        let Some(all) = lines.get(client) else {
            return Ok(Vec::new());
        };
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn recent_messages(&self, client: &str, limit: usize) -> MemoryResult<Vec<ChatMessage>> {
        let user_prefix = format!("{}: ", self.config.user_name);
        let assistant_prefix = format!("{}: ", self.config.assistant_name);

        Ok(self
            .recent(client, limit)
            .await?
            .into_iter()
            .filter_map(|line| {
                if let Some(content) = line.strip_prefix(&user_prefix) {
                    Some(ChatMessage::new("user", content))
                } else if let Some(content) = line.strip_prefix(&assistant_prefix) {
                    Some(ChatMessage::new("assistant", content))
                } else {
                    // Marker lines are not replayed to the model.
                    None
                }
            })
            .collect())
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(str::to_string)
        .collect()
}
