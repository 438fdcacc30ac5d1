use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{AriaConfig, validation};

/// Reads one env var parsed into `T`, falling back to the current value.
fn var_or<T: FromStr>(name: &str, current: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("Invalid value for {name}: '{raw}'")),
        Err(_) => Ok(current),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AriaConfig {
    /// Loads configuration from environment variables (and `.env` if
    /// present), with built-in defaults for everything unset.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        // Server
        config.server.host = env::var("ARIA_HOST").unwrap_or(config.server.host);
        config.server.port = var_or("ARIA_PORT", config.server.port)?;

        // Agent backend
        config.agent.base_url = env::var("ARIA_AGENT_BASE_URL").unwrap_or(config.agent.base_url);
        config.agent.api_key = env::var("ARIA_AGENT_API_KEY").unwrap_or(config.agent.api_key);
        config.agent.model = env::var("ARIA_AGENT_MODEL").unwrap_or(config.agent.model);
        config.agent.max_tokens = var_or("ARIA_AGENT_MAX_TOKENS", config.agent.max_tokens)?;
        config.agent.temperature = var_or("ARIA_AGENT_TEMPERATURE", config.agent.temperature)?;
        config.agent.top_p = var_or("ARIA_AGENT_TOP_P", config.agent.top_p)?;
        config.agent.system_prompt =
            env::var("ARIA_SYSTEM_PROMPT").unwrap_or(config.agent.system_prompt);

        // Synthesis backend
        config.tts.base_url = env::var("ARIA_TTS_BASE_URL").unwrap_or(config.tts.base_url);
        config.tts.voice = env::var("ARIA_TTS_VOICE").unwrap_or(config.tts.voice);
        config.tts.sample_rate = var_or("ARIA_TTS_SAMPLE_RATE", config.tts.sample_rate)?;
        config.tts.request_timeout_seconds = var_or(
            "ARIA_TTS_TIMEOUT_SECONDS",
            config.tts.request_timeout_seconds,
        )?;
        config.tts.max_concurrent_synthesis = var_or(
            "ARIA_TTS_MAX_CONCURRENT",
            config.tts.max_concurrent_synthesis,
        )?;

        // Recognition backend (optional)
        config.stt.base_url = env::var("ARIA_STT_BASE_URL").ok().or(config.stt.base_url);
        config.stt.language = env::var("ARIA_STT_LANGUAGE").unwrap_or(config.stt.language);
        config.stt.request_timeout_seconds = var_or(
            "ARIA_STT_TIMEOUT_SECONDS",
            config.stt.request_timeout_seconds,
        )?;

        // Memory
        if let Some(enabled) = env::var("ARIA_MEMORY_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.memory.enabled = enabled;
        }
        config.memory.history_path = env::var("ARIA_HISTORY_PATH")
            .ok()
            .map(PathBuf::from)
            .or(config.memory.history_path);
        config.memory.top_k = var_or("ARIA_MEMORY_TOP_K", config.memory.top_k)?;
        config.memory.score_threshold =
            var_or("ARIA_MEMORY_SCORE_THRESHOLD", config.memory.score_threshold)?;
        config.memory.user_name = env::var("ARIA_USER_NAME").unwrap_or(config.memory.user_name);
        config.memory.assistant_name =
            env::var("ARIA_ASSISTANT_NAME").unwrap_or(config.memory.assistant_name);

        // Conversation tunables
        config.conversation.playback_timeout_seconds = var_or(
            "ARIA_PLAYBACK_TIMEOUT_SECONDS",
            config.conversation.playback_timeout_seconds,
        )?;
        config.conversation.sentence_max_chars = var_or(
            "ARIA_SENTENCE_MAX_CHARS",
            config.conversation.sentence_max_chars,
        )?;
        config.conversation.history_window =
            var_or("ARIA_HISTORY_WINDOW", config.conversation.history_window)?;

        validation::validate(&config)?;
        Ok(config)
    }
}
