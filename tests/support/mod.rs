//! Scripted transport and provider stubs for end-to-end session tests.
//!
//! The stubs are channel- and script-driven so tests control exactly when
//! frames arrive and how providers respond, without real audio or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use colloquy::core::llm::ReplyStream;
use colloquy::core::stt::FragmentStream;
use colloquy::core::tts::AudioChunkStream;
use colloquy::{
    AudioChunk, AudioFrame, AudioFrameSource, GenerationError, PlaybackSink, ReplyContext,
    ReplyGenerator, SessionNotice, SessionProviders, SessionTransport, SynthesisError, Synthesizer,
    TextFragment, Transcriber, TranscriptionError, TransportError, TurnStatus, VadConfig,
};

pub const SAMPLE_RATE: u32 = 16000;
pub const FRAME_SAMPLES: usize = 512; // 32ms at 16 kHz

/// VAD tuned for fast tests: threshold 0.5, speech start after 2 frames
/// (64ms), speech end after 3 silence frames (96ms).
pub fn test_vad() -> VadConfig {
    VadConfig::new()
        .with_activation_threshold(0.5)
        .with_min_speech_duration(0.064)
        .with_min_silence_duration(0.096)
}

fn frame(amplitude: i16) -> AudioFrame {
    let mut payload = Vec::with_capacity(FRAME_SAMPLES * 2);
    for _ in 0..FRAME_SAMPLES {
        payload.extend_from_slice(&amplitude.to_le_bytes());
    }
    AudioFrame::new(Duration::ZERO, SAMPLE_RATE, 1, Bytes::from(payload))
}

/// RMS energy ~0.8, above the test threshold.
pub fn speech_frame() -> AudioFrame {
    frame(26214)
}

pub fn silence_frame() -> AudioFrame {
    frame(0)
}

// ---------------------------------------------------------------------------
// Transport stubs
// ---------------------------------------------------------------------------

enum SourceItem {
    Frame(AudioFrame),
    Fail(TransportError),
}

/// Test-side handle feeding frames into a [`ScriptedSource`]. Dropping the
/// handle closes the stream, which the session treats as a clean disconnect.
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<SourceItem>,
}

impl SourceHandle {
    pub fn speech(&self, frames: usize) {
        for _ in 0..frames {
            let _ = self.tx.send(SourceItem::Frame(speech_frame()));
        }
    }

    pub fn silence(&self, frames: usize) {
        for _ in 0..frames {
            let _ = self.tx.send(SourceItem::Frame(silence_frame()));
        }
    }

    /// One full utterance: enough speech to open it, enough silence to end it.
    pub fn utterance(&self) {
        self.speech(4);
        self.silence(4);
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .tx
            .send(SourceItem::Fail(TransportError::SourceInterrupted(
                message.to_string(),
            )));
    }
}

struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<SourceItem>,
}

#[async_trait]
impl AudioFrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TransportError> {
        match self.rx.recv().await {
            Some(SourceItem::Frame(frame)) => Ok(Some(frame)),
            Some(SourceItem::Fail(error)) => Err(error),
            None => Ok(None),
        }
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

pub fn scripted_source() -> (SourceHandle, Box<dyn AudioFrameSource>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SourceHandle { tx }, Box::new(ScriptedSource { rx }))
}

/// Shared view of everything a [`RecordingSink`] observed.
#[derive(Clone, Default)]
pub struct SinkRecorder {
    inner: Arc<Mutex<SinkLog>>,
}

#[derive(Default)]
struct SinkLog {
    played: Vec<String>,
    clears: usize,
}

impl SinkRecorder {
    /// Marker texts of fully played chunks, in playback order.
    pub fn played(&self) -> Vec<String> {
        self.inner.lock().played.clone()
    }

    pub fn play_count(&self) -> usize {
        self.inner.lock().played.len()
    }

    pub fn clears(&self) -> usize {
        self.inner.lock().clears
    }
}

/// Sink that records the marker text of each chunk it plays. An optional
/// per-chunk delay simulates real playback time; a chunk abandoned mid-play
/// is not recorded, matching audio that never reached the speaker.
pub struct RecordingSink {
    recorder: SinkRecorder,
    play_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> (SinkRecorder, Box<dyn PlaybackSink>) {
        Self::with_delay(None)
    }

    pub fn with_delay(play_delay: Option<Duration>) -> (SinkRecorder, Box<dyn PlaybackSink>) {
        let recorder = SinkRecorder::default();
        let sink = Box::new(RecordingSink {
            recorder: recorder.clone(),
            play_delay,
        });
        (recorder, sink)
    }
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&mut self, chunk: AudioChunk) -> Result<(), TransportError> {
        if let Some(delay) = self.play_delay {
            tokio::time::sleep(delay).await;
        }
        let marker = String::from_utf8_lossy(&chunk.payload).to_string();
        self.recorder.inner.lock().played.push(marker);
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), TransportError> {
        self.recorder.inner.lock().clears += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider stubs
// ---------------------------------------------------------------------------

pub enum TranscriptScript {
    /// One final fragment carrying this text.
    Text(&'static str),
    /// An explicit fragment sequence.
    Fragments(Vec<TextFragment>),
    Fail(TranscriptionError),
    /// Never produces anything.
    Hang,
}

/// Pops one script per `transcribe` call; hangs once scripts run out.
pub struct ScriptedTranscriber {
    scripts: Mutex<VecDeque<TranscriptScript>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(scripts: Vec<TranscriptScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for ScriptedTranscriber {
    fn model(&self) -> &str {
        "scripted-stt"
    }

    fn transcribe(&self, _utterance: colloquy::Utterance) -> FragmentStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().pop_front() {
            Some(TranscriptScript::Text(text)) => {
                stream::iter(vec![Ok(TextFragment::finalized(text))]).boxed()
            }
            Some(TranscriptScript::Fragments(fragments)) => {
                stream::iter(fragments.into_iter().map(Ok)).boxed()
            }
            Some(TranscriptScript::Fail(error)) => stream::iter(vec![Err(error)]).boxed(),
            Some(TranscriptScript::Hang) | None => stream::pending().boxed(),
        }
    }
}

#[derive(Clone)]
pub enum GenStep {
    Chunk(&'static str),
    Pause(Duration),
    Fail(GenerationError),
}

/// Pops one step list per `generate` call and records every context it was
/// given, so tests can assert on persona, history, and seed.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Vec<GenStep>>>,
    contexts: Mutex<Vec<ReplyContext>>,
}

impl ScriptedGenerator {
    pub fn new(scripts: Vec<Vec<GenStep>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn contexts(&self) -> Vec<ReplyContext> {
        self.contexts.lock().clone()
    }
}

impl ReplyGenerator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted-llm"
    }

    fn generate(&self, context: ReplyContext) -> ReplyStream {
        self.contexts.lock().push(context);
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next() {
                    Some(GenStep::Chunk(text)) => return Some((Ok(text.to_string()), steps)),
                    Some(GenStep::Pause(duration)) => {
                        tokio::time::sleep(duration).await;
                        continue;
                    }
                    Some(GenStep::Fail(error)) => return Some((Err(error), steps)),
                    None => return None,
                }
            }
        })
        .boxed()
    }
}

/// Synthesizer whose single audio chunk carries the input text as payload,
/// so playback order is observable at the sink.
pub struct EchoSynthesizer {
    fail: bool,
}

impl EchoSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

impl Synthesizer for EchoSynthesizer {
    fn model(&self) -> &str {
        "echo-tts"
    }

    fn synthesize(&self, text: &str) -> AudioChunkStream {
        if self.fail {
            return stream::iter(vec![Err(SynthesisError::Provider(
                "synthesis unavailable".to_string(),
            ))])
            .boxed();
        }
        let chunk = AudioChunk::new(Bytes::from(text.to_string()), 24000)
            .with_duration(Duration::from_millis(text.len() as u64 * 10));
        stream::once(async move { Ok(chunk) }).boxed()
    }
}

pub fn providers(
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
) -> SessionProviders {
    SessionProviders {
        transcriber,
        generator,
        synthesizer,
    }
}

pub fn transport(source: Box<dyn AudioFrameSource>, sink: Box<dyn PlaybackSink>) -> SessionTransport {
    SessionTransport { source, sink }
}

// ---------------------------------------------------------------------------
// Notice helpers
// ---------------------------------------------------------------------------

/// Install a logging subscriber once per test binary so traces surface
/// under `cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn next_notice(rx: &mut broadcast::Receiver<SessionNotice>) -> SessionNotice {
    tokio::time::timeout(NOTICE_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for session notice")
        .expect("notice channel closed")
}

/// Skip notices until the next turn end.
pub async fn expect_turn_end(rx: &mut broadcast::Receiver<SessionNotice>) -> (u64, TurnStatus) {
    loop {
        if let SessionNotice::TurnEnded { turn_id, status } = next_notice(rx).await {
            return (turn_id, status);
        }
    }
}

/// Skip notices until the next reply chunk.
pub async fn expect_reply_chunk(rx: &mut broadcast::Receiver<SessionNotice>) -> (u64, String) {
    loop {
        if let SessionNotice::AgentReplyChunk { turn_id, text } = next_notice(rx).await {
            return (turn_id, text);
        }
    }
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + NOTICE_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
