//! Speech-to-text capability.
//!
//! A [`Transcriber`] turns one bounded [`Utterance`] into a lazy stream of
//! [`TextFragment`]s. Provider integrations (network protocols, local
//! models) live outside this crate; the orchestrator only depends on this
//! trait.

use futures::stream::BoxStream;
use std::time::Duration;

use crate::core::audio::Utterance;

/// One incremental piece of transcription output.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    /// The transcribed text.
    pub text: String,
    /// Whether this fragment is final (interim fragments may be revised by
    /// later ones).
    pub is_final: bool,
    /// Confidence score in `[0.0, 1.0]`.
    pub confidence: f32,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// A final fragment with full confidence. Convenient for providers that
    /// only produce whole-utterance results.
    pub fn finalized(text: impl Into<String>) -> Self {
        Self::new(text, true, 1.0)
    }
}

/// Errors scoped to one transcription attempt.
///
/// These fail the current turn, never the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscriptionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Lazy fragment stream returned by [`Transcriber::transcribe`].
pub type FragmentStream = BoxStream<'static, Result<TextFragment, TranscriptionError>>;

/// Speech-to-text provider capability.
///
/// The returned stream is driven under the turn's cancellation scope: when a
/// turn is cancelled the stream is dropped, and implementations must release
/// upstream resources promptly on drop without producing further fragments.
pub trait Transcriber: Send + Sync {
    /// Opaque model identifier this provider was constructed with.
    fn model(&self) -> &str;

    /// Transcribe one utterance as a lazy stream of fragments.
    fn transcribe(&self, utterance: Utterance) -> FragmentStream;
}
