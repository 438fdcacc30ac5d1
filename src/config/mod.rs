//! Configuration module for the Aria server
//!
//! Configuration comes from three layers, highest priority first: a YAML
//! file, environment variables (with `.env` support), and built-in
//! defaults. The submodules keep the layers separate:
//!
//! # Modules
//! - `env`: environment variable loading
//! - `yaml`: YAML configuration file loading and overlay
//! - `validation`: validation of the merged configuration

use std::path::{Path, PathBuf};

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Root server configuration.
#[derive(Debug, Clone)]
pub struct AriaConfig {
    pub server: ServerSettings,
    pub agent: AgentSettings,
    pub tts: TtsSettings,
    pub stt: SttSettings,
    pub memory: MemorySettings,
    pub conversation: ConversationTuning,
}

/// Bind address settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Language-model backend settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub base_url: String,
    /// Bearer token; empty for local endpoints that need none.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub system_prompt: String,
}

/// Speech synthesis backend settings.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub base_url: String,
    pub voice: String,
    pub sample_rate: u32,
    pub request_timeout_seconds: u64,
    pub max_concurrent_synthesis: usize,
}

/// Speech recognition backend settings. `base_url = None` disables audio
/// triggers entirely.
#[derive(Debug, Clone)]
pub struct SttSettings {
    pub base_url: Option<String>,
    pub language: String,
    pub request_timeout_seconds: u64,
}

/// History and recall settings.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub enabled: bool,
    /// Optional append-only transcript file.
    pub history_path: Option<PathBuf>,
    pub top_k: usize,
    pub score_threshold: f32,
    pub user_name: String,
    pub assistant_name: String,
}

/// Turn-flow tunables.
#[derive(Debug, Clone)]
pub struct ConversationTuning {
    /// Bound on the wait for `frontend-playback-complete`.
    pub playback_timeout_seconds: u64,
    pub sentence_max_chars: usize,
    pub thinking_placeholder: String,
    pub proactive_prompt: String,
    pub history_window: usize,
}

impl Default for AriaConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3001,
            },
            agent: AgentSettings {
                base_url: "http://localhost:1234/v1".to_string(),
                api_key: String::new(),
                model: "default".to_string(),
                max_tokens: 512,
                temperature: 0.7,
                top_p: 0.9,
                system_prompt: "You are Aria, a friendly real-time voice assistant. \
                                Keep answers short and conversational."
                    .to_string(),
            },
            tts: TtsSettings {
                base_url: "http://127.0.0.1:8880".to_string(),
                voice: "default".to_string(),
                sample_rate: 24000,
                request_timeout_seconds: 30,
                max_concurrent_synthesis: 3,
            },
            stt: SttSettings {
                base_url: None,
                language: "en".to_string(),
                request_timeout_seconds: 30,
            },
            memory: MemorySettings {
                enabled: true,
                history_path: None,
                top_k: 3,
                score_threshold: 0.3,
                user_name: "User".to_string(),
                assistant_name: "Aria".to_string(),
            },
            conversation: ConversationTuning {
                playback_timeout_seconds: 60,
                sentence_max_chars: 150,
                thinking_placeholder: "Thinking...".to_string(),
                proactive_prompt: "Please say something.".to_string(),
                history_window: 6,
            },
        }
    }
}

impl AriaConfig {
    /// Loads configuration from a YAML file over an environment base.
    ///
    /// Priority order (highest to lowest): YAML values, environment
    /// variables, `.env` values, defaults. The merged result is validated
    /// before it is returned.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::from_env()?;
        let yaml = YamlConfig::load(path)?;
        yaml.apply(&mut config);
        validation::validate(&config)?;
        Ok(config)
    }
}
