//! # Conversation Turn Orchestrator
//!
//! Guarantees that exactly one turn speaks at a time per client (or group),
//! that audio chunks arrive at the client in strict sentence order even
//! though they are synthesized in parallel, and that the next turn does not
//! begin until the client confirms the previous turn's audio finished
//! playing. Remains responsive to interruptions that cancel a turn
//! mid-stream while preserving the partial response in history.
//!
//! Pieces, leaves first:
//! - [`sync_gate`]: request/response rendezvous with clients.
//! - [`tts_manager`]: parallel synthesis, strictly ordered delivery.
//! - [`utils`]: start/end signals, input normalization, routing, cleanup.
//! - [`single`]: one human ↔ assistant turn.
//! - [`group`]: round-robin over assistants sharing one history.
//! - [`handler`]: trigger classification, slot guard, interrupts.

pub mod events;
pub mod group;
pub mod handler;
pub mod registry;
pub mod single;
pub mod sync_gate;
pub mod tts_manager;
pub mod types;
pub mod utils;

pub use events::{ControlAction, OutboundMessage, OutboundSender};
pub use group::{GroupTurnContext, broadcast_sink, process_group_conversation};
pub use handler::ConversationHandler;
pub use registry::{ClientHandle, ClientRegistry};
pub use single::{TurnContext, process_single_turn};
pub use sync_gate::{SyncGate, WaitOutcome};
pub use tts_manager::TtsTaskManager;
pub use types::{
    ClientId, ConversationSettings, ERROR_MARKER, GroupId, GroupRegistry, GroupState,
    INTERRUPT_MARKER, PartialResponses, TurnInput, TurnMetadata, derive_group_id,
};
pub use utils::{PLAYBACK_COMPLETE, TurnError, TurnResult};
