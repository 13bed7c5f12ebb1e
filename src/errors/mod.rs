//! Session-level error types.
//!
//! Stage-scoped errors (`TranscriptionError`, `GenerationError`,
//! `SynthesisError`) live next to their capability traits and never escape
//! the orchestrator: they are converted into a terminal turn status. Only
//! transport and configuration failures propagate out of a session.

use crate::core::audio::TransportError;

/// Error raised when session configuration is rejected before start.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("activation threshold {0} outside [0.0, 1.0]")]
    InvalidThreshold(f32),
    #[error("{name} must be a positive duration, got {seconds}s")]
    InvalidDuration { name: &'static str, seconds: f32 },
    #[error("missing required option: {0}")]
    MissingOption(&'static str),
    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

/// Fatal, session-terminating errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("session task failed: {0}")]
    Terminated(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
