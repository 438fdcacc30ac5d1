//! WebSocket message types
//!
//! Inbound messages the client sends to the orchestrator. Outbound message
//! types live with the conversation core (`core::conversation::events`)
//! because turn flows produce them directly; they are re-exported here so
//! the transport layer has one import spot.

use serde::Deserialize;

pub use crate::core::conversation::events::{ControlAction, OutboundMessage};

/// Messages the client sends to the orchestrator.
///
/// Response kinds the sync gate waits on (`frontend-playback-complete`) are
/// intercepted before this enum is parsed; a variant only exists here so an
/// unmatched response can be logged and dropped instead of erroring.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// User typed text.
    #[serde(rename = "text-input")]
    TextInput { text: String },

    /// User finished speaking. `text` is set when the client ran its own
    /// recognition; `audio` is a base64 clip that overrides the binary
    /// capture buffer when present.
    #[serde(rename = "mic-audio-end")]
    MicAudioEnd {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        audio: Option<String>,
    },

    /// Trigger a proactive (AI-initiated) turn.
    #[serde(rename = "ai-speak-signal")]
    AiSpeakSignal,

    /// Client's audio queue drained.
    #[serde(rename = "frontend-playback-complete")]
    PlaybackComplete,

    /// Cancel the current turn.
    #[serde(rename = "interrupt")]
    Interrupt,

    /// Pull another connected client into the sender's group.
    #[serde(rename = "join-group")]
    JoinGroup { invitee_uid: String },

    /// Leave the current group.
    #[serde(rename = "leave-group")]
    LeaveGroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_input() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"text-input","text":"hi"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::TextInput { text } if text == "hi"));
    }

    #[test]
    fn parses_mic_audio_end_without_fields() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"mic-audio-end"}"#).unwrap();
        assert!(matches!(
            msg,
            InboundMessage::MicAudioEnd {
                text: None,
                audio: None
            }
        ));
    }

    #[test]
    fn parses_bare_signals() {
        assert!(matches!(
            serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap(),
            InboundMessage::Interrupt
        ));
        assert!(matches!(
            serde_json::from_str(r#"{"type":"ai-speak-signal"}"#).unwrap(),
            InboundMessage::AiSpeakSignal
        ));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<InboundMessage, _> =
            serde_json::from_str(r#"{"type":"no-such-thing"}"#);
        assert!(result.is_err());
    }
}
