//! WebSocket conversation protocol
//!
//! - `handler` - upgrade handling and the per-connection session loop
//! - `messages` - inbound message types (outbound live with the core)

pub mod handler;
pub mod messages;

pub use handler::ws_conversation_handler;
