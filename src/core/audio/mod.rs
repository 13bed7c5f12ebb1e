//! Audio primitives and transport capability traits.
//!
//! Inbound audio arrives as [`AudioFrame`]s of 16-bit little-endian PCM from
//! an [`AudioFrameSource`]; outbound agent speech leaves as [`AudioChunk`]s
//! through a [`PlaybackSink`]. Both traits are implemented by the media
//! transport collaborator (WebSocket, WebRTC room, local device, ...), which
//! is outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Bytes per PCM sample (16-bit linear encoding).
pub const BYTES_PER_SAMPLE: usize = 2;

/// One timestamped frame of inbound PCM audio.
///
/// Frames are immutable once produced and owned by the pipeline stage
/// currently processing them; they are only retained across stages inside an
/// [`Utterance`] buffer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Capture time relative to session start.
    pub timestamp: Duration,
    /// Sample rate in Hz, fixed for the lifetime of a session.
    pub sample_rate: u32,
    /// Number of interleaved channels (1 for mono, 2 for stereo).
    pub channel_count: u16,
    /// 16-bit little-endian PCM payload.
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn new(timestamp: Duration, sample_rate: u32, channel_count: u16, payload: Bytes) -> Self {
        Self {
            timestamp,
            sample_rate,
            channel_count,
            payload,
        }
    }

    /// Total number of samples across all channels.
    pub fn sample_count(&self) -> usize {
        self.payload.len() / BYTES_PER_SAMPLE
    }

    /// Playback duration of this frame.
    pub fn duration(&self) -> Duration {
        let channels = self.channel_count.max(1) as u64;
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let per_channel = self.sample_count() as u64 / channels;
        Duration::from_micros(per_channel * 1_000_000 / self.sample_rate as u64)
    }

    /// Decode the payload into i16 samples.
    ///
    /// A trailing odd byte, if present, is ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.payload
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Normalized RMS energy of the frame in `[0.0, 1.0]`.
    ///
    /// This is the per-frame speech activity measure consumed by the VAD.
    pub fn rms_energy(&self) -> f32 {
        let count = self.sample_count();
        if count == 0 {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples()
            .map(|s| {
                let normalized = s as f64 / i16::MIN.unsigned_abs() as f64;
                normalized * normalized
            })
            .sum();
        (sum_squares / count as f64).sqrt() as f32
    }
}

/// One chunk of synthesized agent speech headed for playback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// 16-bit little-endian PCM payload.
    pub payload: Bytes,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Playback duration, when the producer knows it.
    pub duration: Option<Duration>,
}

impl AudioChunk {
    pub fn new(payload: Bytes, sample_rate: u32) -> Self {
        Self {
            payload,
            sample_rate,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// An ordered run of frames spanning one detected speech interval.
///
/// Owned exclusively by the VAD while speech is in progress, then handed to
/// the transcriber, which owns it until transcription completes or is
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
}

impl Utterance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Capture timestamp of the first frame, if any.
    pub fn started_at(&self) -> Option<Duration> {
        self.frames.first().map(|frame| frame.timestamp)
    }

    /// Sample rate of the underlying audio, taken from the first frame.
    pub fn sample_rate(&self) -> Option<u32> {
        self.frames.first().map(|frame| frame.sample_rate)
    }

    /// Total audio duration across all buffered frames.
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// Concatenate all frame payloads into one contiguous PCM buffer.
    pub fn into_payload(self) -> Bytes {
        let total: usize = self.frames.iter().map(|frame| frame.payload.len()).sum();
        let mut buf = Vec::with_capacity(total);
        for frame in &self.frames {
            buf.extend_from_slice(&frame.payload);
        }
        Bytes::from(buf)
    }
}

/// Errors raised by the media transport collaborator.
///
/// Transport failures are fatal to the session and propagate to the caller;
/// reconnection is the supervisor's concern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("frame source interrupted: {0}")]
    SourceInterrupted(String),
    #[error("playback sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("transport closed")]
    Closed,
}

/// Inbound side of the media transport: a continuous stream of PCM frames.
#[async_trait]
pub trait AudioFrameSource: Send {
    /// Receive the next inbound frame.
    ///
    /// Returns `Ok(None)` when the remote end closed cleanly. An `Err` is
    /// fatal to the session.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TransportError>;

    /// Sample rate negotiated for this session, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Outbound side of the media transport: agent speech playback.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Queue one chunk of agent speech for playback.
    async fn play(&mut self, chunk: AudioChunk) -> Result<(), TransportError>;

    /// Discard any queued, unplayed audio.
    ///
    /// Called on barge-in so that cancelled speech does not keep playing out
    /// of a transport-side buffer.
    async fn clear(&mut self) -> Result<(), TransportError>;
}
