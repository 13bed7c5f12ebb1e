//! Configuration for voice activity detection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigurationError;

/// Tuning parameters for the voice activity detector.
///
/// The defaults favor conversational turn-taking: enough speech to rule out
/// transient noise before a turn opens, and enough silence to rule out a
/// breath or mid-sentence pause before a turn closes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    /// Energy cutoff in `[0.0, 1.0]`. Frames with normalized RMS energy
    /// above this value count as speech.
    ///
    /// Lower values detect quieter speech at the cost of more false
    /// triggers; higher values do the opposite.
    pub activation_threshold: f32,

    /// Minimum continuous above-threshold audio, in seconds, before speech
    /// start is declared. Suppresses transient noise.
    pub min_speech_duration: f32,

    /// Minimum continuous below-threshold audio, in seconds, before speech
    /// end is declared. Tolerates brief pauses mid-sentence.
    pub min_silence_duration: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            // Slightly above the midpoint to reduce false triggers from
            // background noise.
            activation_threshold: 0.55,
            // 200ms of speech filters out coughs and brief filler sounds.
            min_speech_duration: 0.2,
            // Natural speech contains pauses of 200-400ms; half a second of
            // true silence indicates the speaker has finished.
            min_silence_duration: 0.5,
        }
    }
}

impl VadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activation_threshold(mut self, threshold: f32) -> Self {
        self.activation_threshold = threshold;
        self
    }

    pub fn with_min_speech_duration(mut self, seconds: f32) -> Self {
        self.min_speech_duration = seconds;
        self
    }

    pub fn with_min_silence_duration(mut self, seconds: f32) -> Self {
        self.min_silence_duration = seconds;
        self
    }

    /// Minimum speech duration as a [`Duration`], rounded to microseconds so
    /// threshold comparisons line up with whole audio frames.
    pub fn min_speech(&self) -> Duration {
        seconds_to_duration(self.min_speech_duration)
    }

    /// Minimum silence duration as a [`Duration`], rounded to microseconds.
    pub fn min_silence(&self) -> Duration {
        seconds_to_duration(self.min_silence_duration)
    }

    /// Validate thresholds and durations.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.activation_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.activation_threshold)
        {
            return Err(ConfigurationError::InvalidThreshold(
                self.activation_threshold,
            ));
        }
        if !self.min_speech_duration.is_finite() || self.min_speech_duration < 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                name: "min_speech_duration",
                seconds: self.min_speech_duration,
            });
        }
        if !self.min_silence_duration.is_finite() || self.min_silence_duration <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                name: "min_silence_duration",
                seconds: self.min_silence_duration,
            });
        }
        Ok(())
    }
}

fn seconds_to_duration(seconds: f32) -> Duration {
    Duration::from_micros((seconds.max(0.0) as f64 * 1_000_000.0).round() as u64)
}
