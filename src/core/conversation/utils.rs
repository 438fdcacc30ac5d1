//! Shared helpers for conversation flows.
//!
//! Stateless building blocks used by both the single and the group flow:
//! start signals, input normalization, agent-output routing, turn
//! finalization, and cleanup. Each helper has a precise contract so the
//! flows compose deterministically.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::agent::AgentOutput;
use crate::core::stt::SpeechToText;

use super::events::{ControlAction, OutboundMessage, OutboundSender};
use super::sync_gate::{SyncGate, WaitOutcome};
use super::tts_manager::TtsTaskManager;
use super::types::{ClientId, TurnInput};

/// Response kind that confirms the client's audio queue drained.
pub const PLAYBACK_COMPLETE: &str = "frontend-playback-complete";

/// Turn flow error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("client channel closed")]
    ClientGone,

    #[error("turn interrupted")]
    Interrupted,

    #[error("agent failed: {0}")]
    Agent(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("memory store failed: {0}")]
    Memory(String),
}

/// Result type for turn flows.
pub type TurnResult<T> = Result<T, TurnError>;

pub async fn send_to_client(sink: &OutboundSender, message: OutboundMessage) -> TurnResult<()> {
    sink.send(message).await.map_err(|_| TurnError::ClientGone)
}

/// Emits `conversation-chain-start` plus the thinking placeholder so the UI
/// can show activity before any model work begins.
pub async fn send_start_signals(sink: &OutboundSender, placeholder: &str) -> TurnResult<()> {
    send_to_client(
        sink,
        OutboundMessage::Control {
            action: ControlAction::ConversationChainStart,
        },
    )
    .await?;
    send_to_client(
        sink,
        OutboundMessage::FullText {
            text: placeholder.to_string(),
        },
    )
    .await
}

/// Closes the conversation chain without any response.
pub async fn send_chain_end(sink: &OutboundSender) -> TurnResult<()> {
    send_to_client(
        sink,
        OutboundMessage::Control {
            action: ControlAction::ConversationChainEnd,
        },
    )
    .await
}

/// Resolves the trigger payload to text, transcribing captured audio when
/// needed. Returns `None` when recognition produced nothing usable; the
/// transcription is echoed to the client so it can render what was heard.
pub async fn normalize_input(
    input: TurnInput,
    transcriber: Option<&Arc<dyn SpeechToText>>,
    sink: &OutboundSender,
) -> TurnResult<Option<String>> {
    match input {
        TurnInput::Text(text) => Ok(Some(text)),
        TurnInput::Audio(audio) => {
            let Some(stt) = transcriber else {
                return Err(TurnError::Transcription(
                    "no transcriber configured for audio input".to_string(),
                ));
            };
            let text = stt
                .transcribe(&audio)
                .await
                .map_err(|e| TurnError::Transcription(e.to_string()))?;
            if text.trim().chars().count() < 2 {
                debug!("transcription empty or too short, ignoring");
                return Ok(None);
            }
            send_to_client(
                sink,
                OutboundMessage::UserInputTranscription { text: text.clone() },
            )
            .await?;
            Ok(Some(text))
        }
    }
}

/// Routes one agent output item: sentences and pre-rendered audio serialize
/// through the TTS manager, tool status goes straight to the client.
pub async fn route_agent_output(
    output: AgentOutput,
    tts_manager: &mut TtsTaskManager,
    sink: &OutboundSender,
) -> TurnResult<()> {
    match output {
        AgentOutput::Sentence(sentence) => {
            tts_manager.speak(sentence, sink);
            Ok(())
        }
        AgentOutput::Audio(audio) => {
            tts_manager.speak_prerendered(audio, sink);
            Ok(())
        }
        AgentOutput::ToolStatus(status) => {
            send_to_client(
                sink,
                OutboundMessage::ToolCallStatus {
                    name: status.name,
                    status: status.status,
                    detail: status.detail,
                },
            )
            .await
        }
    }
}

/// Finalizes a turn: drains synthesis, signals `backend-synth-complete`,
/// waits (bounded) for every recipient to confirm playback, then closes the
/// chain. A timeout or a vanished client does not abort finalization;
/// keeping history consistent matters more than the extra wait.
pub async fn finalize_turn(
    sink: &OutboundSender,
    tts_manager: &mut TtsTaskManager,
    gate: &SyncGate,
    recipients: &[ClientId],
    playback_timeout: Duration,
) -> TurnResult<()> {
    tts_manager.finish(sink).await;

    let waits = recipients
        .iter()
        .map(|uid| gate.wait(uid, PLAYBACK_COMPLETE, None, Some(playback_timeout)));
    let outcomes = futures::future::join_all(waits).await;
    for (uid, outcome) in recipients.iter().zip(outcomes) {
        match outcome {
            WaitOutcome::Response(_) => {}
            WaitOutcome::TimedOut => {
                warn!(client = %uid, "no playback confirmation, proceeding anyway");
            }
            WaitOutcome::Cancelled => {
                debug!(client = %uid, "client went away before confirming playback");
            }
        }
    }

    send_to_client(sink, OutboundMessage::ForceNewMessage).await?;
    send_chain_end(sink).await
}

/// Releases turn-scoped resources. Runs on every exit path; calling it twice
/// has the same observable effect as calling it once.
pub fn cleanup_turn(tts_manager: &mut TtsTaskManager) {
    tts_manager.clear();
    debug!("turn resources released");
}
