//! Outbound wire messages.
//!
//! Every message the orchestrator sends to a client, as a tagged enum so the
//! JSON shape matches the protocol exactly. Flows write these into a
//! per-client channel; the WebSocket layer serializes them on its own task.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::agent::Actions;

/// Per-client outbound channel end handed to turn flows.
pub type OutboundSender = mpsc::Sender<OutboundMessage>;

/// Lifecycle actions carried by `control` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlAction {
    #[serde(rename = "conversation-chain-start")]
    ConversationChainStart,
    #[serde(rename = "conversation-chain-end")]
    ConversationChainEnd,
}

/// Messages the orchestrator sends to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "control")]
    Control { action: ControlAction },

    #[serde(rename = "full-text")]
    FullText { text: String },

    #[serde(rename = "user-input-transcription")]
    UserInputTranscription { text: String },

    /// One ordered audio chunk. `audio` is base64; an empty string closes a
    /// sequence gap when synthesis failed for that sentence.
    #[serde(rename = "audio-response")]
    AudioResponse {
        audio: String,
        display_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actions: Option<Actions>,
        sequence: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "backend-synth-complete")]
    SynthComplete,

    #[serde(rename = "force-new-message")]
    ForceNewMessage,

    #[serde(rename = "interrupt-signal")]
    InterruptSignal,

    #[serde(rename = "tool_call_status")]
    ToolCallStatus {
        name: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn control_message_wire_shape() {
        let msg = OutboundMessage::Control {
            action: ControlAction::ConversationChainStart,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "control", "action": "conversation-chain-start"})
        );
    }

    #[test]
    fn audio_response_omits_empty_optionals() {
        let msg = OutboundMessage::AudioResponse {
            audio: "QUJD".to_string(),
            display_text: "Hello!".to_string(),
            actions: None,
            sequence: 3,
            sample_rate: Some(24000),
            error: None,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "audio-response");
        assert_eq!(value["sequence"], 3);
        assert!(value.get("actions").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn bare_signals_have_only_a_type() {
        for (msg, tag) in [
            (OutboundMessage::SynthComplete, "backend-synth-complete"),
            (OutboundMessage::ForceNewMessage, "force-new-message"),
            (OutboundMessage::InterruptSignal, "interrupt-signal"),
        ] {
            let value: Value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value, json!({"type": tag}));
        }
    }
}
