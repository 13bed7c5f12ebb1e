//! Energy-based voice activity detector with hysteresis.
//!
//! # State transitions
//!
//! ```text
//! [Silence] ── energy > threshold ──► [Armed]
//!     ▲                                  │
//!     │  energy <= threshold             │ accumulated speech >= min_speech
//!     └──────────────────────────────    ▼
//!                                     [Speaking] ──► emits SpeechEvent::Started
//!     ┌──────────────────────────────►   │
//!     │   energy > threshold             │ energy <= threshold
//!     │   (re-arm, no event)             ▼
//!  [Ending] ◄─────────────────────────────
//!     │
//!     │ accumulated silence >= min_silence
//!     ▼
//! [Silence] ──► emits SpeechEvent::Ended(utterance)
//! ```
//!
//! Time is accounted from frame durations rather than wall clock, so a given
//! frame sequence always produces the same events.

use std::time::Duration;

use tracing::debug;

use crate::core::audio::{AudioFrame, Utterance};

use super::config::VadConfig;

/// Speech boundary event emitted while processing frames.
#[derive(Debug)]
pub enum SpeechEvent {
    /// The user started speaking: enough continuous above-threshold audio
    /// accumulated to rule out transient noise.
    Started,
    /// The user finished speaking. Carries the buffered utterance, which the
    /// detector no longer owns.
    Ended(Utterance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence,
    Armed,
    Speaking,
    Ending,
}

/// Frame-by-frame voice activity detector.
///
/// Feed every inbound frame through [`process`](Self::process); most calls
/// return `None`, with `Some` marking a speech boundary. The detector owns
/// the in-flight utterance buffer and hands it off on speech end.
pub struct VoiceActivityDetector {
    config: VadConfig,
    phase: Phase,
    /// Above-threshold time accumulated while armed.
    speech_time: Duration,
    /// Below-threshold time accumulated while ending.
    silence_time: Duration,
    buffer: Utterance,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            phase: Phase::Silence,
            speech_time: Duration::ZERO,
            silence_time: Duration::ZERO,
            buffer: Utterance::new(),
        }
    }

    /// Process one frame, returning a boundary event if one occurred.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<SpeechEvent> {
        let active = frame.rms_energy() > self.config.activation_threshold;
        let frame_time = frame.duration();

        match (self.phase, active) {
            (Phase::Silence, false) => None,
            (Phase::Silence, true) => {
                self.phase = Phase::Armed;
                self.speech_time = frame_time;
                self.buffer.push(frame.clone());
                self.try_promote()
            }
            (Phase::Armed, true) => {
                self.speech_time += frame_time;
                self.buffer.push(frame.clone());
                self.try_promote()
            }
            (Phase::Armed, false) => {
                // Transient noise, not speech. Discard and re-arm from scratch.
                debug!(
                    armed_ms = self.speech_time.as_millis() as u64,
                    "vad: armed audio dropped below threshold before min speech"
                );
                self.phase = Phase::Silence;
                self.speech_time = Duration::ZERO;
                self.buffer = Utterance::new();
                None
            }
            (Phase::Speaking, true) => {
                self.buffer.push(frame.clone());
                None
            }
            (Phase::Speaking, false) => {
                self.phase = Phase::Ending;
                self.silence_time = frame_time;
                self.buffer.push(frame.clone());
                self.try_finish()
            }
            (Phase::Ending, true) => {
                // Mid-utterance pause ended before the silence timer expired.
                // Resume speaking without fragmenting the utterance.
                debug!(
                    pause_ms = self.silence_time.as_millis() as u64,
                    "vad: speech resumed within silence window"
                );
                self.phase = Phase::Speaking;
                self.silence_time = Duration::ZERO;
                self.buffer.push(frame.clone());
                None
            }
            (Phase::Ending, false) => {
                self.silence_time += frame_time;
                self.buffer.push(frame.clone());
                self.try_finish()
            }
        }
    }

    fn try_promote(&mut self) -> Option<SpeechEvent> {
        if self.speech_time < self.config.min_speech() {
            return None;
        }
        self.phase = Phase::Speaking;
        debug!(
            speech_ms = self.speech_time.as_millis() as u64,
            "vad: speech started"
        );
        Some(SpeechEvent::Started)
    }

    fn try_finish(&mut self) -> Option<SpeechEvent> {
        if self.silence_time < self.config.min_silence() {
            return None;
        }
        let utterance = std::mem::take(&mut self.buffer);
        self.phase = Phase::Silence;
        self.speech_time = Duration::ZERO;
        self.silence_time = Duration::ZERO;
        debug!(
            frames = utterance.frame_count(),
            utterance_ms = utterance.duration().as_millis() as u64,
            "vad: speech ended"
        );
        Some(SpeechEvent::Ended(utterance))
    }

    /// Whether the detector currently considers the user to be speaking.
    pub fn is_speaking(&self) -> bool {
        matches!(self.phase, Phase::Speaking | Phase::Ending)
    }

    /// Discard all accumulated state and return to silence.
    pub fn reset(&mut self) {
        self.phase = Phase::Silence;
        self.speech_time = Duration::ZERO;
        self.silence_time = Duration::ZERO;
        self.buffer = Utterance::new();
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}
