use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// Create the WebSocket router
///
/// One long-lived socket per client carries the whole conversation
/// protocol: triggers and responses inbound, ordered audio and control
/// signals outbound.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws::ws_conversation_handler))
        .layer(TraceLayer::new_for_http())
}
