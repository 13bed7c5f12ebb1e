//! Speech synthesis capability.
//!
//! A [`Synthesizer`] turns one reply text chunk into a lazy stream of
//! [`AudioChunk`]s for playback. Cancellation drops the stream; a cancelled
//! synthesis must not leave audio queued for playback afterward; the
//! orchestrator pairs stream drop with a playback-sink clear.

use futures::stream::BoxStream;
use std::time::Duration;

use crate::core::audio::AudioChunk;

/// Errors scoped to one synthesis attempt.
///
/// These fail the current turn, never the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unknown voice: {0}")]
    UnknownVoice(String),
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),
}

/// Lazy audio stream returned by [`Synthesizer::synthesize`].
pub type AudioChunkStream = BoxStream<'static, Result<AudioChunk, SynthesisError>>;

/// Text-to-speech provider capability.
pub trait Synthesizer: Send + Sync {
    /// Opaque model/voice identifier this provider was constructed with.
    fn model(&self) -> &str;

    /// Synthesize one text chunk as a lazy stream of audio chunks.
    fn synthesize(&self, text: &str) -> AudioChunkStream;
}
