//! Shared types for the conversation turn system.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Opaque id of a connected client.
pub type ClientId = String;
/// Opaque id of a group of clients conversing jointly.
pub type GroupId = String;

/// Marker line recorded when a turn is cancelled mid-stream.
pub const INTERRUPT_MARKER: &str = "[Interrupted by user]";
/// Marker line recorded when the agent fails mid-turn.
pub const ERROR_MARKER: &str = "[error]";

/// Per-turn flags. Lifetime: one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnMetadata {
    /// The AI initiated this turn.
    pub proactive: bool,
    /// Do not write the exchange to the recall index.
    pub skip_memory: bool,
    /// Do not append the exchange to persistent history.
    pub skip_history: bool,
}

impl TurnMetadata {
    /// Flags for AI-initiated turns: the orchestrator's own solicitations
    /// never pollute the conversational record.
    pub fn proactive() -> Self {
        Self {
            proactive: true,
            skip_memory: true,
            skip_history: true,
        }
    }
}

/// What triggered the turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    /// Captured audio awaiting transcription.
    Audio(Vec<u8>),
}

/// Derives a stable group id from its founding members.
pub fn derive_group_id(members: &[ClientId]) -> GroupId {
    let mut sorted: Vec<&str> = members.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("group-{:016x}", xxh3_64(sorted.join(",").as_bytes()))
}

/// Mutable state of one group conversation.
///
/// Mutation is serialized by the one-active-turn-per-group invariant; the
/// short mutex here only covers individual reads and writes, never awaits.
#[derive(Debug)]
pub struct GroupState {
    pub group_id: GroupId,
    /// Shared utterance lines, `"<speaker>: <text>"`.
    pub history: Vec<String>,
    /// How many history entries each member has already observed.
    pub read_index: HashMap<ClientId, usize>,
    /// Speaking order; the head speaks and is re-appended at the tail.
    pub queue: VecDeque<ClientId>,
    pub current_speaker: Option<ClientId>,
    /// Short identifier for logs and resource names.
    pub session_tag: String,
}

impl GroupState {
    pub fn new(group_id: GroupId, members: &[ClientId]) -> Self {
        let mut session_tag = Uuid::new_v4().simple().to_string();
        session_tag.truncate(8);
        Self {
            group_id,
            history: Vec::new(),
            read_index: members.iter().map(|m| (m.clone(), 0)).collect(),
            queue: members.iter().cloned().collect(),
            current_speaker: None,
            session_tag,
        }
    }

    /// History entries `member` has not observed yet.
    pub fn unread(&self, member: &str) -> Vec<String> {
        let from = self
            .read_index
            .get(member)
            .copied()
            .unwrap_or(self.history.len())
            .min(self.history.len());
        self.history[from..].to_vec()
    }

    /// Marks the whole history as observed by `member`.
    pub fn mark_read(&mut self, member: &str) {
        self.read_index.insert(member.to_string(), self.history.len());
    }

    /// Mid-conversation joins start reading from "now".
    pub fn add_member(&mut self, member: ClientId) {
        self.read_index.insert(member.clone(), self.history.len());
        self.queue.push_back(member);
    }

    pub fn remove_member(&mut self, member: &str) {
        self.queue.retain(|m| m != member);
        self.read_index.remove(member);
        if self.current_speaker.as_deref() == Some(member) {
            self.current_speaker = None;
        }
    }
}

/// Process-wide map of in-flight group conversations, so interrupt handlers
/// can find state by id without threading it through every call.
#[derive(Default)]
pub struct GroupRegistry {
    states: Mutex<HashMap<GroupId, Arc<Mutex<GroupState>>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<Mutex<GroupState>>> {
        self.states.lock().get(group_id).cloned()
    }

    pub fn get_or_create(&self, group_id: &str, members: &[ClientId]) -> Arc<Mutex<GroupState>> {
        self.states
            .lock()
            .entry(group_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(GroupState::new(group_id.to_string(), members)))
            })
            .clone()
    }

    pub fn remove(&self, group_id: &str) -> Option<Arc<Mutex<GroupState>>> {
        self.states.lock().remove(group_id)
    }
}

/// Partial response text per speaking client.
///
/// Flows update this as sentences stream so the interrupt path can persist
/// what was said after the turn task has been cancelled.
#[derive(Clone, Default)]
pub struct PartialResponses {
    inner: Arc<Mutex<HashMap<ClientId, String>>>,
}

impl PartialResponses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, client: &str, text: String) {
        self.inner.lock().insert(client.to_string(), text);
    }

    pub fn get(&self, client: &str) -> Option<String> {
        self.inner.lock().get(client).cloned()
    }

    pub fn take(&self, client: &str) -> Option<String> {
        self.inner.lock().remove(client)
    }

    pub fn clear(&self, client: &str) {
        self.inner.lock().remove(client);
    }
}

/// Turn-flow tunables, resolved from server configuration.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub thinking_placeholder: String,
    pub proactive_prompt: String,
    /// Bound on the wait for `frontend-playback-complete`.
    pub playback_timeout: Duration,
    pub history_window: usize,
    pub max_concurrent_synthesis: usize,
    pub memory_enabled: bool,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            thinking_placeholder: "Thinking...".to_string(),
            proactive_prompt: "Please say something.".to_string(),
            playback_timeout: Duration::from_secs(60),
            history_window: 6,
            max_concurrent_synthesis: 3,
            memory_enabled: true,
        }
    }
}
