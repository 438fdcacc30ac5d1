//! Axum WebSocket handler
//!
//! Manages one conversation session per socket: assigns the client id,
//! registers the outbound channel, pumps inbound messages into the sync
//! gate and the conversation handler, and tears everything down when the
//! socket closes.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::conversation::{OutboundMessage, TurnInput, TurnMetadata};
use crate::state::AppState;

use super::messages::InboundMessage;

const CHANNEL_BUFFER_SIZE: usize = 256;

/// WebSocket conversation handler
/// Upgrades the HTTP connection to WebSocket for the conversation protocol
pub async fn ws_conversation_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("WebSocket conversation upgrade requested");
    ws.on_upgrade(move |socket| handle_conversation_socket(socket, state))
}

/// Manages the entire WebSocket session for one client.
async fn handle_conversation_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let client_uid = Uuid::new_v4().to_string();
    info!(client = %client_uid, "WebSocket conversation established");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    let display_name = format!("Guest-{}", &client_uid[..8]);
    app_state
        .registry
        .register(client_uid.clone(), message_tx, display_name);

    // Outbound pump: direct serialization and send, no batching.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("failed to serialize outbound message: {e}"),
            }
        }
    });

    // Raw microphone frames accumulate here until mic-audio-end.
    let mut capture_buffer = BytesMut::new();

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                process_text_message(&text, &client_uid, &mut capture_buffer, &app_state).await;
            }
            Ok(Message::Binary(data)) => {
                capture_buffer.extend_from_slice(&data);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client = %client_uid, "connection closed by client");
                break;
            }
            Err(e) => {
                warn!(client = %client_uid, "WebSocket error: {e}");
                break;
            }
        }
    }

    // Teardown order matters: deregister first so nothing new is queued,
    // then release waiters and cancel the active turn.
    app_state.registry.deregister(&client_uid);
    app_state.conversations.on_disconnect(&client_uid).await;
    sender_task.abort();
    info!(client = %client_uid, "WebSocket conversation terminated");
}

/// Routes one inbound text frame: sync-gate responses first, then typed
/// protocol messages.
async fn process_text_message(
    text: &str,
    client_uid: &str,
    capture_buffer: &mut BytesMut,
    app_state: &Arc<AppState>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(client = %client_uid, "unparseable message: {e}");
            if let Some(sink) = app_state.registry.sender(client_uid) {
                let _ = sink
                    .send(OutboundMessage::Error {
                        message: format!("Invalid message format: {e}"),
                    })
                    .await;
            }
            return;
        }
    };

    // Responses a flow is already waiting on resolve through the sync gate.
    if app_state.gate.deliver(client_uid, &value) {
        return;
    }

    let inbound: InboundMessage = match serde_json::from_value(value) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(client = %client_uid, "unrecognized message: {e}");
            return;
        }
    };

    let conversations = &app_state.conversations;
    match inbound {
        InboundMessage::TextInput { text } => {
            if text.trim().is_empty() {
                debug!(client = %client_uid, "empty text-input, ignoring");
                return;
            }
            conversations
                .handle_trigger(client_uid, TurnInput::Text(text), TurnMetadata::default())
                .await;
        }
        InboundMessage::MicAudioEnd { text, audio } => {
            let clip = match text {
                Some(text) if !text.trim().is_empty() => {
                    capture_buffer.clear();
                    conversations
                        .handle_trigger(client_uid, TurnInput::Text(text), TurnMetadata::default())
                        .await;
                    return;
                }
                _ => match audio {
                    Some(b64) => match BASE64.decode(b64.as_bytes()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(client = %client_uid, "undecodable audio payload: {e}");
                            return;
                        }
                    },
                    None => capture_buffer.split().freeze().to_vec(),
                },
            };
            capture_buffer.clear();
            if clip.is_empty() {
                warn!(client = %client_uid, "mic-audio-end without captured audio");
                return;
            }
            conversations
                .handle_trigger(client_uid, TurnInput::Audio(clip), TurnMetadata::default())
                .await;
        }
        InboundMessage::AiSpeakSignal => {
            conversations.handle_proactive(client_uid).await;
        }
        InboundMessage::PlaybackComplete => {
            // No waiter was registered; the protocol drops stray responses.
            debug!(client = %client_uid, "playback confirmation with no waiter, dropped");
        }
        InboundMessage::Interrupt => {
            conversations.handle_interrupt(client_uid).await;
        }
        InboundMessage::JoinGroup { invitee_uid } => {
            conversations.join_group(client_uid, &invitee_uid).await;
        }
        InboundMessage::LeaveGroup => {
            conversations.leave_group(client_uid).await;
        }
    }
}
