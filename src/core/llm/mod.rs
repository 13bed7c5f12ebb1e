//! Reply generation capability.
//!
//! A [`ReplyGenerator`] consumes the conversation so far plus a seed (the
//! transcribed user utterance, or an explicit instruction for
//! agent-initiated turns) and produces the reply as a lazy stream of text
//! chunks. Chunks are forwarded to synthesis as they arrive to minimize
//! time-to-first-audio.

use futures::stream::BoxStream;
use std::time::Duration;

use crate::core::turn::Turn;

/// What drives a reply: user speech or an explicit instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplySeed {
    /// Transcribed text of the user's utterance.
    UserText(String),
    /// An instruction with no preceding user utterance, e.g. the opening
    /// greeting of a session.
    Instruction(String),
}

/// Everything a generator needs to produce one reply.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    /// Fixed system-context prefix describing the agent.
    pub persona: String,
    /// Snapshot of the finished turns so far, oldest first.
    pub history: Vec<Turn>,
    /// What this reply responds to.
    pub seed: ReplySeed,
}

impl ReplyContext {
    pub fn new(persona: impl Into<String>, history: Vec<Turn>, seed: ReplySeed) -> Self {
        Self {
            persona: persona.into(),
            history,
            seed,
        }
    }
}

/// Errors scoped to one generation attempt.
///
/// These fail the current turn, never the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Lazy reply stream returned by [`ReplyGenerator::generate`].
///
/// Chunks are emitted in generation order; the orchestrator never reorders
/// them.
pub type ReplyStream = BoxStream<'static, Result<String, GenerationError>>;

/// Language-model provider capability.
///
/// Each call to [`generate`](Self::generate) is independent: the stream it
/// returns covers exactly one reply and is dropped on cancellation, after
/// which implementations must stop producing chunks and release upstream
/// resources promptly.
pub trait ReplyGenerator: Send + Sync {
    /// Opaque model identifier this provider was constructed with.
    fn model(&self) -> &str;

    /// Generate one reply as a lazy stream of text chunks.
    fn generate(&self, context: ReplyContext) -> ReplyStream;
}
