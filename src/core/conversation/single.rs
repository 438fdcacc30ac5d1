//! The single-conversation turn flow.
//!
//! One human ↔ assistant exchange: start signals, input normalization,
//! memory retrieval, agent streaming into parallel synthesis, playback
//! confirmation, history append, cleanup. The whole flow is raced against a
//! cancellation token; cleanup runs on every exit path and cancellation is
//! re-propagated so the handler can settle its task slot.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::agent::{AgentEngine, AgentOutput, AgentRequest};
use crate::core::memory::{ConversationMemory, context_block};
use crate::core::stt::SpeechToText;
use crate::core::tts::SpeechSynthesizer;

use super::events::{OutboundMessage, OutboundSender};
use super::sync_gate::SyncGate;
use super::tts_manager::TtsTaskManager;
use super::types::{
    ClientId, ConversationSettings, ERROR_MARKER, PartialResponses, TurnInput, TurnMetadata,
};
use super::utils::{
    TurnError, TurnResult, cleanup_turn, finalize_turn, normalize_input, route_agent_output,
    send_chain_end, send_start_signals, send_to_client,
};

/// Everything a single turn needs; assembled by the conversation handler.
#[derive(Clone)]
pub struct TurnContext {
    pub client_uid: ClientId,
    pub sink: OutboundSender,
    pub engine: Arc<dyn AgentEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Option<Arc<dyn SpeechToText>>,
    pub memory: Arc<dyn ConversationMemory>,
    pub gate: Arc<SyncGate>,
    pub partials: PartialResponses,
    pub settings: ConversationSettings,
}

/// Runs one complete turn for one client.
pub async fn process_single_turn(
    ctx: TurnContext,
    input: TurnInput,
    metadata: TurnMetadata,
    cancel: CancellationToken,
) -> TurnResult<()> {
    let mut tts_manager = TtsTaskManager::new(
        ctx.synthesizer.clone(),
        ctx.settings.max_concurrent_synthesis,
    );

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(TurnError::Interrupted),
        result = run_turn(&ctx, input, metadata, &mut tts_manager) => result,
    };

    cleanup_turn(&mut tts_manager);

    match outcome {
        Ok(()) => {
            ctx.partials.clear(&ctx.client_uid);
            Ok(())
        }
        Err(TurnError::Interrupted) => {
            info!(client = %ctx.client_uid, "turn interrupted");
            let partial = ctx.partials.get(&ctx.client_uid).unwrap_or_default();
            ctx.engine.handle_interrupt(&partial).await;
            // The handler persists the partial once cancellation settles.
            Err(TurnError::Interrupted)
        }
        Err(err) => {
            error!(client = %ctx.client_uid, error = %err, "turn failed");
            let _ = send_to_client(
                &ctx.sink,
                OutboundMessage::Error {
                    message: err.to_string(),
                },
            )
            .await;

            if !metadata.skip_history {
                let partial = ctx.partials.take(&ctx.client_uid).unwrap_or_default();
                if let Err(e) = ctx
                    .memory
                    .append_assistant(&ctx.client_uid, &partial, &[ERROR_MARKER])
                    .await
                {
                    warn!(error = %e, "failed to record failed turn");
                }
            } else {
                ctx.partials.clear(&ctx.client_uid);
            }

            let _ = send_chain_end(&ctx.sink).await;
            Err(err)
        }
    }
}

async fn run_turn(
    ctx: &TurnContext,
    input: TurnInput,
    metadata: TurnMetadata,
    tts_manager: &mut TtsTaskManager,
) -> TurnResult<()> {
    send_start_signals(&ctx.sink, &ctx.settings.thinking_placeholder).await?;

    let user_text = match normalize_input(input, ctx.transcriber.as_ref(), &ctx.sink).await? {
        Some(text) => text,
        None => return send_chain_end(&ctx.sink).await,
    };
    if user_text.trim().is_empty() && !metadata.proactive {
        debug!(client = %ctx.client_uid, "empty input, aborting turn");
        return send_chain_end(&ctx.sink).await;
    }

    info!(client = %ctx.client_uid, "user: {user_text}");

    let mut fragments = Vec::new();
    if ctx.settings.memory_enabled {
        match ctx.memory.retrieve(&ctx.client_uid, &user_text).await {
            Ok(hits) => fragments = hits,
            Err(e) => warn!(error = %e, "memory retrieval failed"),
        }
    }

    // The window is captured before the user line is appended so the model
    // does not see the current utterance twice.
    let history = ctx
        .memory
        .recent_messages(&ctx.client_uid, ctx.settings.history_window)
        .await
        .map_err(|e| TurnError::Memory(e.to_string()))?;

    if !metadata.skip_history {
        ctx.memory
            .append_user(&ctx.client_uid, &user_text)
            .await
            .map_err(|e| TurnError::Memory(e.to_string()))?;
    }

    // Seed an empty partial so an interrupt before the first sentence still
    // records that the assistant was cut off.
    ctx.partials.set(&ctx.client_uid, String::new());

    let request = AgentRequest {
        user_text: user_text.clone(),
        context_block: context_block(&fragments),
        history,
        speaker: None,
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
                push_fragment(&mut full_response, &sentence.display_text);
                ctx.partials.set(&ctx.client_uid, full_response.clone());
            }
            AgentOutput::Audio(audio) => {
                push_fragment(&mut full_response, &audio.display_text);
                ctx.partials.set(&ctx.client_uid, full_response.clone());
            }
            AgentOutput::ToolStatus(_) => {}
        }
        route_agent_output(output, tts_manager, &ctx.sink).await?;
    }

    info!(client = %ctx.client_uid, "assistant: {full_response}");

    finalize_turn(
        &ctx.sink,
        tts_manager,
        &ctx.gate,
        std::slice::from_ref(&ctx.client_uid),
        ctx.settings.playback_timeout,
    )
    .await?;

    if !metadata.skip_history {
        ctx.memory
            .append_assistant(&ctx.client_uid, &full_response, &[])
            .await
            .map_err(|e| TurnError::Memory(e.to_string()))?;
    }
    if !metadata.skip_memory && ctx.settings.memory_enabled {
        if let Err(e) = ctx
            .memory
            .ingest(&ctx.client_uid, &user_text, &full_response)
            .await
        {
            warn!(error = %e, "memory ingest failed");
        }
    }

    Ok(())
}

fn push_fragment(accumulated: &mut String, fragment: &str) {
    if !accumulated.is_empty() {
        accumulated.push(' ');
    }
    accumulated.push_str(fragment);
}
