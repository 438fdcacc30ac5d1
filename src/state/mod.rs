use std::sync::Arc;
use std::time::Duration;

use crate::config::AriaConfig;
use crate::core::agent::{AgentEngine, OpenAiAgent, OpenAiAgentConfig};
use crate::core::conversation::{
    ClientRegistry, ConversationHandler, ConversationSettings, SyncGate,
};
use crate::core::memory::{ConversationMemory, TranscriptStore, TranscriptStoreConfig};
use crate::core::stt::{HttpTranscriber, HttpTranscriberConfig, SpeechToText};
use crate::core::tts::{HttpSynthesizer, HttpSynthesizerConfig, SpeechSynthesizer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AriaConfig,
    pub registry: Arc<ClientRegistry>,
    pub gate: Arc<SyncGate>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub conversations: Arc<ConversationHandler>,
}

impl AppState {
    /// Builds the collaborator engines from configuration and wires the
    /// conversation handler on top of them.
    pub fn new(config: AriaConfig) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(ClientRegistry::new());
        let gate = Arc::new(SyncGate::new());

        let engine: Arc<dyn AgentEngine> = Arc::new(OpenAiAgent::new(OpenAiAgentConfig {
            base_url: config.agent.base_url.clone(),
            api_key: config.agent.api_key.clone(),
            model: config.agent.model.clone(),
            max_tokens: config.agent.max_tokens,
            temperature: config.agent.temperature,
            top_p: config.agent.top_p,
            system_prompt: config.agent.system_prompt.clone(),
            sentence_max_chars: config.conversation.sentence_max_chars,
            request_timeout: Duration::from_secs(120),
        })?);

        let synthesizer: Arc<dyn SpeechSynthesizer> =
            Arc::new(HttpSynthesizer::new(HttpSynthesizerConfig {
                base_url: config.tts.base_url.clone(),
                voice: config.tts.voice.clone(),
                sample_rate: config.tts.sample_rate,
                request_timeout: Duration::from_secs(config.tts.request_timeout_seconds),
            })?);

        let transcriber: Option<Arc<dyn SpeechToText>> = match &config.stt.base_url {
            Some(base_url) => Some(Arc::new(HttpTranscriber::new(HttpTranscriberConfig {
                base_url: base_url.clone(),
                language: config.stt.language.clone(),
                request_timeout: Duration::from_secs(config.stt.request_timeout_seconds),
            })?)),
            None => None,
        };

        let memory: Arc<dyn ConversationMemory> =
            Arc::new(TranscriptStore::new(TranscriptStoreConfig {
                user_name: config.memory.user_name.clone(),
                assistant_name: config.memory.assistant_name.clone(),
                history_path: config.memory.history_path.clone(),
                top_k: config.memory.top_k,
                score_threshold: config.memory.score_threshold,
            }));

        let settings = ConversationSettings {
            thinking_placeholder: config.conversation.thinking_placeholder.clone(),
            proactive_prompt: config.conversation.proactive_prompt.clone(),
            playback_timeout: Duration::from_secs(config.conversation.playback_timeout_seconds),
            history_window: config.conversation.history_window,
            max_concurrent_synthesis: config.tts.max_concurrent_synthesis,
            memory_enabled: config.memory.enabled,
        };

        let conversations = Arc::new(ConversationHandler::new(
            engine,
            synthesizer.clone(),
            transcriber,
            memory,
            gate.clone(),
            registry.clone(),
            settings,
        ));

        Ok(Arc::new(Self {
            config,
            registry,
            gate,
            synthesizer,
            conversations,
        }))
    }
}
