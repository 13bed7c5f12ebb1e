pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use crate::config::{BargeInPolicy, ProviderModels, SessionConfig};
pub use crate::core::audio::{
    AudioChunk, AudioFrame, AudioFrameSource, PlaybackSink, TransportError, Utterance,
};
pub use crate::core::llm::{GenerationError, ReplyContext, ReplyGenerator, ReplySeed};
pub use crate::core::session::{Session, SessionNotice, SessionProviders, SessionTransport};
pub use crate::core::stt::{TextFragment, Transcriber, TranscriptionError};
pub use crate::core::tts::{SynthesisError, Synthesizer};
pub use crate::core::turn::{ConversationHistory, SessionState, Turn, TurnId, TurnStatus};
pub use crate::core::vad::{SpeechEvent, VadConfig, VoiceActivityDetector};
pub use crate::errors::{ConfigurationError, SessionError};
