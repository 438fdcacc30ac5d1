use super::AriaConfig;

/// Validates the merged configuration before the server starts.
pub fn validate(config: &AriaConfig) -> Result<(), String> {
    if config.agent.base_url.trim().is_empty() {
        return Err("agent.base_url must not be empty".to_string());
    }
    if config.tts.base_url.trim().is_empty() {
        return Err("tts.base_url must not be empty".to_string());
    }
    if !(0.0..=2.0).contains(&config.agent.temperature) {
        return Err(format!(
            "agent.temperature must be in [0.0, 2.0], got {}",
            config.agent.temperature
        ));
    }
    if config.conversation.playback_timeout_seconds == 0 {
        return Err("conversation.playback_timeout_seconds must be at least 1".to_string());
    }
    if config.conversation.sentence_max_chars < 40 {
        return Err(format!(
            "conversation.sentence_max_chars must be at least 40, got {}",
            config.conversation.sentence_max_chars
        ));
    }
    if config.tts.max_concurrent_synthesis == 0 {
        return Err("tts.max_concurrent_synthesis must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&config.memory.score_threshold) {
        return Err(format!(
            "memory.score_threshold must be in [0.0, 1.0], got {}",
            config.memory.score_threshold
        ));
    }
    Ok(())
}
