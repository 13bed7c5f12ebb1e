//! Conversation data model: turns, history, and per-session state.

use serde::Serialize;

use crate::core::vad::VadConfig;

/// Monotonically increasing identifier for turns within one session.
pub type TurnId = u64;

/// Lifecycle status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Created but no stage has run yet.
    Pending,
    /// The utterance is being transcribed.
    Transcribing,
    /// A reply is being generated.
    Generating,
    /// Synthesized reply audio is playing back.
    Speaking,
    /// The reply played to completion.
    Completed,
    /// The user barged in; the partial reply is preserved.
    Interrupted,
    /// A stage failed; the partial record is preserved.
    Failed,
}

impl TurnStatus {
    /// Whether this status ends a turn's lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Failed)
    }
}

/// One exchange: a user utterance (possibly empty for agent-initiated turns)
/// and the agent's reply, chunk by chunk.
///
/// Owned by the orchestrator for its entire lifetime and appended to the
/// [`ConversationHistory`] once it reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub turn_id: TurnId,
    /// Transcribed user text. Empty for agent-initiated turns (greeting).
    pub user_text: String,
    /// Reply text chunks in generation order. For interrupted or failed
    /// turns this holds whatever was produced before the turn ended.
    pub agent_reply_chunks: Vec<String>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            user_text: String::new(),
            agent_reply_chunks: Vec::new(),
            status: TurnStatus::Pending,
        }
    }

    /// The full reply text produced so far.
    pub fn agent_reply(&self) -> String {
        self.agent_reply_chunks.concat()
    }

    /// Whether this turn was initiated by the agent rather than user speech.
    pub fn is_agent_initiated(&self) -> bool {
        self.user_text.is_empty()
    }
}

/// Append-only record of finished turns, oldest first.
///
/// Turns are appended exactly once, with a terminal status, and never
/// mutated afterwards. Interrupted turns keep their partial reply so the
/// generator's context stays truthful.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished turn.
    ///
    /// # Panics
    /// Debug-asserts that the turn carries a terminal status.
    pub fn append(&mut self, turn: Turn) {
        debug_assert!(
            turn.status.is_terminal(),
            "appended turn {} with non-terminal status {:?}",
            turn.turn_id,
            turn.status
        );
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Clone the finished turns for use as generation context.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }
}

/// Coarse position of the session's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No user speech, no active turn.
    Idle,
    /// The user is speaking (or just was) and no turn is running yet.
    Listening,
    /// The active turn's utterance is being transcribed.
    Transcribing,
    /// The active turn's reply is being generated.
    Generating,
    /// The active turn's reply audio is playing.
    Speaking,
}

/// All per-session mutable state.
///
/// Mutated only by the orchestrator's control loop; stage tasks report back
/// through a channel rather than touching this directly, so no lock guards
/// it.
#[derive(Debug)]
pub struct SessionState {
    /// The at-most-one active turn.
    pub current_turn: Option<Turn>,
    pub history: ConversationHistory,
    pub vad_config: VadConfig,
    pub lifecycle: LifecycleState,
}

impl SessionState {
    pub fn new(vad_config: VadConfig) -> Self {
        Self {
            current_turn: None,
            history: ConversationHistory::new(),
            vad_config,
            lifecycle: LifecycleState::Idle,
        }
    }

    pub fn active_turn_id(&self) -> Option<TurnId> {
        self.current_turn.as_ref().map(|turn| turn.turn_id)
    }
}
