//! HTTP and WebSocket request handlers
//!
//! - `api` - health check and one-shot synthesis endpoints
//! - `ws` - the WebSocket conversation protocol

pub mod api;
pub mod ws;

// Re-export commonly used handlers for convenient access
pub use ws::ws_conversation_handler;
