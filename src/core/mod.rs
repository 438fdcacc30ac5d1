pub mod agent;
pub mod conversation;
pub mod memory;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use agent::{
    AgentEngine, AgentError, AgentOutput, AgentRequest, AgentResult, AgentStream, Actions,
    AudioOutput, ChatMessage, OpenAiAgent, OpenAiAgentConfig, SentenceOutput, ToolCallStatus,
};

pub use conversation::{
    ClientRegistry, ConversationHandler, ConversationSettings, OutboundMessage, OutboundSender,
    SyncGate, TtsTaskManager, TurnError, TurnInput, TurnMetadata, TurnResult, WaitOutcome,
};

pub use memory::{ConversationMemory, MemoryError, MemoryResult, TranscriptStore};
pub use stt::{HttpTranscriber, HttpTranscriberConfig, SpeechToText, SttError, SttResult};
pub use tts::{
    AudioData, HttpSynthesizer, HttpSynthesizerConfig, SpeechSynthesizer, SynthError, SynthResult,
};
