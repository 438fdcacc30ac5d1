//! The group conversation flow.
//!
//! Round-robin over N assistants sharing one history: the queue head
//! speaks, its response is appended to the shared history, its read cursor
//! jumps to the end, and it is re-enqueued at the tail. Every payload and
//! control signal produced while a member speaks is broadcast to the whole
//! group, so all clients observe the same turn. The loop runs until the
//! queue empties (member removal or shutdown) or the turn is cancelled.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::agent::{AgentEngine, AgentOutput, AgentRequest};
use crate::core::stt::SpeechToText;
use crate::core::tts::SpeechSynthesizer;

use super::events::{OutboundMessage, OutboundSender};
use super::registry::ClientRegistry;
use super::sync_gate::SyncGate;
use super::tts_manager::TtsTaskManager;
use super::types::{ClientId, ConversationSettings, GroupId, GroupRegistry, PartialResponses, TurnInput};
use super::utils::{
    TurnError, TurnResult, cleanup_turn, finalize_turn, route_agent_output, send_start_signals,
};

const BROADCAST_BUFFER: usize = 64;

/// Everything a group conversation needs; assembled by the handler.
#[derive(Clone)]
pub struct GroupTurnContext {
    pub group_id: GroupId,
    pub registry: Arc<ClientRegistry>,
    pub groups: Arc<GroupRegistry>,
    pub engine: Arc<dyn AgentEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Option<Arc<dyn SpeechToText>>,
    pub gate: Arc<SyncGate>,
    pub partials: PartialResponses,
    pub settings: ConversationSettings,
}

/// Fan-out sink: everything written to the returned sender is broadcast to
/// every member. A failed recipient never blocks the rest; the forwarder
/// exits once all sender clones are gone.
pub fn broadcast_sink(
    registry: Arc<ClientRegistry>,
    members: Vec<ClientId>,
) -> (OutboundSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(BROADCAST_BUFFER);
    let forwarder = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            registry.broadcast(&members, &message).await;
        }
    });
    (tx, forwarder)
}

/// Advances the round-robin until the queue is empty or the turn is
/// cancelled. The trigger utterance seeds the shared history before the
/// first member speaks.
pub async fn process_group_conversation(
    ctx: GroupTurnContext,
    trigger_uid: ClientId,
    input: TurnInput,
    cancel: CancellationToken,
) -> TurnResult<()> {
    let Some(state) = ctx.groups.get(&ctx.group_id) else {
        warn!(group = %ctx.group_id, "group state missing, nothing to do");
        return Ok(());
    };

    let members_now: Vec<ClientId> = { state.lock().read_index.keys().cloned().collect() };

    let trigger_text = match input {
        TurnInput::Text(text) => text,
        TurnInput::Audio(audio) => {
            let Some(stt) = &ctx.transcriber else {
                return Err(TurnError::Transcription(
                    "no transcriber configured for audio input".to_string(),
                ));
            };
            let text = stt
                .transcribe(&audio)
                .await
                .map_err(|e| TurnError::Transcription(e.to_string()))?;
            if text.trim().chars().count() < 2 {
                debug!(group = %ctx.group_id, "transcription too short, ignoring trigger");
                return Ok(());
            }
            ctx.registry
                .broadcast(
                    &members_now,
                    &OutboundMessage::UserInputTranscription { text: text.clone() },
                )
                .await;
            text
        }
    };
    if trigger_text.trim().is_empty() {
        return Ok(());
    }

    {
        // Seed the shared history; every member's assistant (including the
        // author's) still has this line ahead of its read cursor.
        let mut st = state.lock();
        let name = ctx.registry.display_name(&trigger_uid);
        st.history.push(format!("{name}: {trigger_text}"));
    }

    loop {
        if cancel.is_cancelled() {
            return Err(TurnError::Interrupted);
        }

        // Idle → Speaking(m): pop the head, expose it as current speaker,
        // and slice the history it has not seen yet.
        let Some((speaker, context_lines, session_tag)) = ({
            let mut st = state.lock();
            st.queue.pop_front().map(|m| {
                st.current_speaker = Some(m.clone());
                (m.clone(), st.unread(&m), st.session_tag.clone())
            })
        }) else {
            debug!(group = %ctx.group_id, "queue empty, conversation over");
            break;
        };

        let members: Vec<ClientId> = { state.lock().read_index.keys().cloned().collect() };
        info!(
            group = %ctx.group_id,
            tag = %session_tag,
            speaker = %speaker,
            "group turn starts"
        );

        let result = run_member_turn(&ctx, &speaker, &members, &context_lines, &cancel).await;

        match result {
            Ok(full_response) => {
                let mut st = state.lock();
                let name = ctx.registry.display_name(&speaker);
                st.history.push(format!("{name}: {full_response}"));
                // A member that left mid-turn stays gone.
                if st.read_index.contains_key(&speaker) {
                    st.mark_read(&speaker);
                    st.queue.push_back(speaker.clone());
                }
                st.current_speaker = None;
                ctx.partials.clear(&speaker);
            }
            Err(TurnError::Interrupted) => return Err(TurnError::Interrupted),
            Err(err) => {
                // One member failing aborts only that member's turn.
                warn!(
                    group = %ctx.group_id,
                    speaker = %speaker,
                    error = %err,
                    "member turn failed, advancing"
                );
                {
                    let mut st = state.lock();
                    if st.read_index.contains_key(&speaker) {
                        st.mark_read(&speaker);
                        st.queue.push_back(speaker.clone());
                    }
                    st.current_speaker = None;
                }
                ctx.partials.clear(&speaker);
                // Keeps a group of failing backends from spinning hot.
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }
    }

    Ok(())
}

/// Steps 1–7 of the single flow, restricted to one member and broadcast to
/// the whole group through a dedicated TTS manager.
async fn run_member_turn(
    ctx: &GroupTurnContext,
    speaker: &ClientId,
    members: &[ClientId],
    context_lines: &[String],
    cancel: &CancellationToken,
) -> TurnResult<String> {
    let (sink, _forwarder) = broadcast_sink(ctx.registry.clone(), members.to_vec());
    let mut tts_manager = TtsTaskManager::new(
        ctx.synthesizer.clone(),
        ctx.settings.max_concurrent_synthesis,
    );

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(TurnError::Interrupted),
        result = speak_as_member(ctx, speaker, members, context_lines, &sink, &mut tts_manager) => result,
    };

    cleanup_turn(&mut tts_manager);
    outcome
}

async fn speak_as_member(
    ctx: &GroupTurnContext,
    speaker: &ClientId,
    members: &[ClientId],
    context_lines: &[String],
    sink: &OutboundSender,
    tts_manager: &mut TtsTaskManager,
) -> TurnResult<String> {
    send_start_signals(sink, &ctx.settings.thinking_placeholder).await?;

    let name = ctx.registry.display_name(speaker);
    let request = AgentRequest {
        user_text: if context_lines.is_empty() {
            "(no new messages)".to_string()
        } else {
            context_lines.join("\n")
        },
        context_block: "You are one participant in a group conversation. \
                        Reply to the new messages in your own voice."
            .to_string(),
        history: Vec::new(),
        speaker: Some(name.clone()),
    };

    let mut stream = ctx
        .engine
        .chat(request)
        .await
        .map_err(|e| TurnError::Agent(e.to_string()))?;

    let mut full_response = String::new();
    while let Some(item) = stream.next().await {
        let output = item.map_err(|e| TurnError::Agent(e.to_string()))?;
        match &output {
            AgentOutput::Sentence(sentence) => {
                if !full_response.is_empty() {
                    full_response.push(' ');
                }
                full_response.push_str(&sentence.display_text);
                ctx.partials.set(speaker, full_response.clone());
            }
            AgentOutput::Audio(audio) => {
                if !full_response.is_empty() {
                    full_response.push(' ');
                }
                full_response.push_str(&audio.display_text);
                ctx.partials.set(speaker, full_response.clone());
            }
            AgentOutput::ToolStatus(_) => {}
        }
        route_agent_output(output, tts_manager, sink).await?;
    }

    info!(speaker = %name, "group member response: {full_response}");

    finalize_turn(
        sink,
        tts_manager,
        &ctx.gate,
        members,
        ctx.settings.playback_timeout,
    )
    .await?;

    Ok(full_response)
}
