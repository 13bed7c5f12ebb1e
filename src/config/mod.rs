//! Session configuration.
//!
//! Everything here is validated once in [`Session::start`] before any turn
//! begins; invalid configuration is the only failure mode that prevents a
//! session from starting.
//!
//! [`Session::start`]: crate::core::session::Session::start

use serde::{Deserialize, Serialize};

use crate::core::vad::VadConfig;
use crate::errors::ConfigurationError;

/// What to do with in-flight playback when the user barges in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInPolicy {
    /// Stop playback immediately, abandoning the chunk currently playing.
    #[default]
    CutImmediately,
    /// Let the chunk currently playing finish, then stop. Queued chunks are
    /// still discarded.
    FinishChunk,
}

/// Opaque model identifiers for the provider collaborators.
///
/// The core never interprets these; they are logged at session start and
/// available to whoever constructs the providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderModels {
    pub stt: Option<String>,
    pub llm: Option<String>,
    pub tts: Option<String>,
}

/// Configuration for one voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Voice activity detection tuning.
    pub vad: VadConfig,

    /// Fixed system-context prefix passed to the reply generator with every
    /// request.
    pub persona: String,

    /// When set, the session opens with an agent-initiated turn seeded by
    /// this instruction instead of waiting for user speech.
    pub greeting_instructions: Option<String>,

    /// Opaque model identifiers, passed through to the providers.
    pub models: ProviderModels,

    /// How to treat in-flight playback on barge-in.
    pub barge_in: BargeInPolicy,

    /// Short utterance spoken when a turn fails, e.g. "I didn't catch
    /// that.". `None` disables the fallback.
    pub failure_fallback: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            persona: String::new(),
            greeting_instructions: None,
            models: ProviderModels::default(),
            barge_in: BargeInPolicy::default(),
            failure_fallback: Some("I didn't catch that.".to_string()),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_greeting(mut self, instructions: impl Into<String>) -> Self {
        self.greeting_instructions = Some(instructions.into());
        self
    }

    pub fn with_models(mut self, models: ProviderModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_barge_in(mut self, policy: BargeInPolicy) -> Self {
        self.barge_in = policy;
        self
    }

    pub fn with_failure_fallback(mut self, text: Option<String>) -> Self {
        self.failure_fallback = text;
        self
    }

    /// Validate the configuration, failing fast before a session starts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.vad.validate()?;

        if let Some(greeting) = &self.greeting_instructions {
            if greeting.trim().is_empty() {
                return Err(ConfigurationError::InvalidOption {
                    name: "greeting_instructions",
                    reason: "must not be blank when set".to_string(),
                });
            }
        }
        if let Some(fallback) = &self.failure_fallback {
            if fallback.trim().is_empty() {
                return Err(ConfigurationError::InvalidOption {
                    name: "failure_fallback",
                    reason: "must not be blank when set".to_string(),
                });
            }
        }
        Ok(())
    }
}
