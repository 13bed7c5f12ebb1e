//! Events flowing between stage tasks, the orchestrator, and subscribers.

use serde::Serialize;

use crate::core::audio::TransportError;
use crate::core::llm::GenerationError;
use crate::core::stt::TranscriptionError;
use crate::core::tts::SynthesisError;
use crate::core::turn::{TurnId, TurnStatus};

/// A stage failure scoped to one turn.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum StageFailure {
    #[error("transcription failed: {0}")]
    Transcription(TranscriptionError),
    #[error("generation failed: {0}")]
    Generation(GenerationError),
    #[error("synthesis failed: {0}")]
    Synthesis(SynthesisError),
}

/// How a reply pipeline task ended.
#[derive(Debug)]
pub(crate) enum TurnOutcome {
    /// All reply audio played to completion.
    Completed,
    /// The turn's cancellation token fired; the orchestrator already
    /// recorded the turn when it triggered the cancellation.
    Cancelled,
    /// A stage failed mid-turn.
    Failed(StageFailure),
    /// The playback sink failed. Fatal to the session.
    Transport(TransportError),
}

/// Results and progress reported by stage tasks into the orchestrator's
/// single-consumer event channel. Events carry the turn id they belong to;
/// the orchestrator discards events from turns that are no longer active.
#[derive(Debug)]
pub(crate) enum StageEvent {
    TranscriptFragment {
        turn_id: TurnId,
        text: String,
        is_final: bool,
    },
    TranscriptComplete {
        turn_id: TurnId,
        text: String,
    },
    TranscriptFailed {
        turn_id: TurnId,
        error: TranscriptionError,
    },
    ReplyChunk {
        turn_id: TurnId,
        text: String,
    },
    /// First audio chunk of the reply reached the playback sink.
    SpeakingStarted {
        turn_id: TurnId,
    },
    TurnFinished {
        turn_id: TurnId,
        outcome: TurnOutcome,
    },
}

/// Outward-facing session events, e.g. for transcript display in a UI.
///
/// Delivered on a broadcast channel; lagging subscribers lose old notices
/// rather than slowing the session down.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    /// The user started speaking.
    SpeechStarted,
    /// Transcription output for a turn, interim or final.
    UserTranscript {
        turn_id: TurnId,
        text: String,
        is_final: bool,
    },
    /// One chunk of the agent's reply, in generation order.
    AgentReplyChunk { turn_id: TurnId, text: String },
    /// A turn reached a terminal status.
    TurnEnded { turn_id: TurnId, status: TurnStatus },
}
