//! Voice activity detection.
//!
//! Classifies inbound audio frames as speech or silence, applies hysteresis
//! so transient noise and mid-sentence pauses do not produce spurious
//! boundaries, and buffers the frames of the current utterance until the end
//! of speech is declared.

pub mod config;
pub mod detector;

pub use config::VadConfig;
pub use detector::{SpeechEvent, VoiceActivityDetector};
