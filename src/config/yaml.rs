use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::AriaConfig;

/// YAML configuration overlay.
///
/// Every field is optional so a file can override just the values it cares
/// about; everything else keeps the environment/default value.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// agent:
///   base_url: "https://openrouter.ai/api/v1"
///   api_key: "sk-..."
///   model: "meta-llama/llama-3-8b-instruct"
///
/// tts:
///   base_url: "http://127.0.0.1:8880"
///   voice: "female_01"
///
/// stt:
///   base_url: "http://127.0.0.1:8178"
///   language: "es"
///
/// memory:
///   enabled: true
///   history_path: "./data/history.txt"
///
/// conversation:
///   playback_timeout_seconds: 60
///   sentence_max_chars: 150
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub agent: Option<AgentYaml>,
    pub tts: Option<TtsYaml>,
    pub stt: Option<SttYaml>,
    pub memory: Option<MemoryYaml>,
    pub conversation: Option<ConversationYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentYaml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TtsYaml {
    pub base_url: Option<String>,
    pub voice: Option<String>,
    pub sample_rate: Option<u32>,
    pub request_timeout_seconds: Option<u64>,
    pub max_concurrent_synthesis: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SttYaml {
    pub base_url: Option<String>,
    pub language: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryYaml {
    pub enabled: Option<bool>,
    pub history_path: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub user_name: Option<String>,
    pub assistant_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationYaml {
    pub playback_timeout_seconds: Option<u64>,
    pub sentence_max_chars: Option<usize>,
    pub thinking_placeholder: Option<String>,
    pub proactive_prompt: Option<String>,
    pub history_window: Option<usize>,
}

macro_rules! overlay {
    ($target:expr, $source:expr) => {
        if let Some(value) = $source {
            $target = value;
        }
    };
}

impl YamlConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let parsed: Self =
            serde_yaml::from_str(&raw).map_err(|e| format!("malformed {}: {e}", path.display()))?;
        Ok(parsed)
    }

    /// Applies every set value on top of `config`.
    pub fn apply(self, config: &mut AriaConfig) {
        if let Some(server) = self.server {
            overlay!(config.server.host, server.host);
            overlay!(config.server.port, server.port);
        }
        if let Some(agent) = self.agent {
            overlay!(config.agent.base_url, agent.base_url);
            overlay!(config.agent.api_key, agent.api_key);
            overlay!(config.agent.model, agent.model);
            overlay!(config.agent.max_tokens, agent.max_tokens);
            overlay!(config.agent.temperature, agent.temperature);
            overlay!(config.agent.top_p, agent.top_p);
            overlay!(config.agent.system_prompt, agent.system_prompt);
        }
        if let Some(tts) = self.tts {
            overlay!(config.tts.base_url, tts.base_url);
            overlay!(config.tts.voice, tts.voice);
            overlay!(config.tts.sample_rate, tts.sample_rate);
            overlay!(
                config.tts.request_timeout_seconds,
                tts.request_timeout_seconds
            );
            overlay!(
                config.tts.max_concurrent_synthesis,
                tts.max_concurrent_synthesis
            );
        }
        if let Some(stt) = self.stt {
            if stt.base_url.is_some() {
                config.stt.base_url = stt.base_url;
            }
            overlay!(config.stt.language, stt.language);
            overlay!(
                config.stt.request_timeout_seconds,
                stt.request_timeout_seconds
            );
        }
        if let Some(memory) = self.memory {
            overlay!(config.memory.enabled, memory.enabled);
            if memory.history_path.is_some() {
                config.memory.history_path = memory.history_path;
            }
            overlay!(config.memory.top_k, memory.top_k);
            overlay!(config.memory.score_threshold, memory.score_threshold);
            overlay!(config.memory.user_name, memory.user_name);
            overlay!(config.memory.assistant_name, memory.assistant_name);
        }
        if let Some(conversation) = self.conversation {
            overlay!(
                config.conversation.playback_timeout_seconds,
                conversation.playback_timeout_seconds
            );
            overlay!(
                config.conversation.sentence_max_chars,
                conversation.sentence_max_chars
            );
            overlay!(
                config.conversation.thinking_placeholder,
                conversation.thinking_placeholder
            );
            overlay!(
                config.conversation.proactive_prompt,
                conversation.proactive_prompt
            );
            overlay!(
                config.conversation.history_window,
                conversation.history_window
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
server:
  port: 9000
agent:
  model: "mistral-7b"
"#,
        )
        .unwrap();

        let mut config = AriaConfig::default();
        let default_host = config.server.host.clone();
        yaml.apply(&mut config);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, default_host);
        assert_eq!(config.agent.model, "mistral-7b");
        assert_eq!(config.agent.max_tokens, 512);
    }

    #[test]
    fn empty_yaml_changes_nothing() {
        let yaml: YamlConfig = serde_yaml::from_str("{}").unwrap();
        let mut config = AriaConfig::default();
        yaml.apply(&mut config);
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn stt_url_can_be_enabled_from_yaml() {
        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
stt:
  base_url: "http://127.0.0.1:8178"
"#,
        )
        .unwrap();
        let mut config = AriaConfig::default();
        yaml.apply(&mut config);
        assert_eq!(
            config.stt.base_url.as_deref(),
            Some("http://127.0.0.1:8178")
        );
    }
}
