//! The per-session turn state machine.
//!
//! One control loop owns all session state. It `select!`s over the inbound
//! frame stream and the stage-event channel, so audio keeps flowing through
//! the VAD, and barge-in keeps working, while transcription, generation,
//! and synthesis are in flight. Stage tasks report back through events; the
//! loop is the only code that mutates [`SessionState`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::core::audio::{AudioFrame, AudioFrameSource, Utterance};
use crate::core::llm::{ReplyContext, ReplyGenerator, ReplySeed};
use crate::core::stt::Transcriber;
use crate::core::tts::Synthesizer;
use crate::core::turn::{LifecycleState, SessionState, Turn, TurnId, TurnStatus};
use crate::core::vad::{SpeechEvent, VoiceActivityDetector};
use crate::errors::SessionError;

use super::events::{SessionNotice, StageEvent, StageFailure, TurnOutcome};
use super::pipeline::{
    spawn_fallback_speech, spawn_reply, spawn_transcription, SharedSink,
};

pub(crate) struct TurnOrchestrator {
    config: SessionConfig,
    vad: VoiceActivityDetector,
    sink: SharedSink,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    state: SessionState,
    events_tx: mpsc::Sender<StageEvent>,
    notices: broadcast::Sender<SessionNotice>,
    next_turn_id: TurnId,
    /// Cancellation scope of the active turn's stage tasks.
    turn_cancel: Option<CancellationToken>,
    /// Cancellation scope of an in-flight failure fallback utterance.
    fallback_cancel: Option<CancellationToken>,
    /// The single queued utterance awaiting the active turn's end.
    pending_utterance: Option<Utterance>,
    shutdown: CancellationToken,
}

impl TurnOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SessionConfig,
        sink: SharedSink,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
        events_tx: mpsc::Sender<StageEvent>,
        notices: broadcast::Sender<SessionNotice>,
        shutdown: CancellationToken,
    ) -> Self {
        let vad = VoiceActivityDetector::new(config.vad);
        let state = SessionState::new(config.vad);
        Self {
            config,
            vad,
            sink,
            transcriber,
            generator,
            synthesizer,
            state,
            events_tx,
            notices,
            next_turn_id: 0,
            turn_cancel: None,
            fallback_cancel: None,
            pending_utterance: None,
            shutdown,
        }
    }

    /// Drive the session until the transport closes, a fatal error occurs,
    /// or shutdown is requested. Returns the final session state.
    pub(crate) async fn run(
        mut self,
        mut source: Box<dyn AudioFrameSource>,
        mut events_rx: mpsc::Receiver<StageEvent>,
    ) -> Result<SessionState, SessionError> {
        if let Some(instructions) = self.config.greeting_instructions.clone() {
            self.start_agent_turn(ReplySeed::Instruction(instructions));
        }

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("session shutdown requested");
                    break;
                }
                event = events_rx.recv() => {
                    if let Some(event) = event {
                        self.on_stage_event(event).await?;
                    }
                }
                frame = source.next_frame() => match frame {
                    Ok(Some(frame)) => self.on_frame(frame).await?,
                    Ok(None) => {
                        info!("frame source closed");
                        break;
                    }
                    Err(transport_error) => {
                        error!(error = %transport_error, "frame source interrupted");
                        self.close_out();
                        return Err(SessionError::Transport(transport_error));
                    }
                },
            }
        }

        self.close_out();
        Ok(self.state)
    }

    async fn on_frame(&mut self, frame: AudioFrame) -> Result<(), SessionError> {
        match self.vad.process(&frame) {
            Some(SpeechEvent::Started) => self.on_speech_started().await,
            Some(SpeechEvent::Ended(utterance)) => self.on_speech_ended(utterance),
            None => Ok(()),
        }
    }

    async fn on_speech_started(&mut self) -> Result<(), SessionError> {
        self.notify(SessionNotice::SpeechStarted);

        // User speech silences any in-flight fallback utterance.
        if let Some(token) = self.fallback_cancel.take() {
            token.cancel();
            self.clear_sink().await?;
        }

        match self.state.lifecycle {
            LifecycleState::Transcribing
            | LifecycleState::Generating
            | LifecycleState::Speaking => self.barge_in().await,
            LifecycleState::Idle => {
                self.state.lifecycle = LifecycleState::Listening;
                Ok(())
            }
            LifecycleState::Listening => Ok(()),
        }
    }

    /// User speech takes priority over agent speech: cancel every in-flight
    /// stage, preserve the partial turn record, and discard queued audio.
    async fn barge_in(&mut self) -> Result<(), SessionError> {
        let Some(mut turn) = self.state.current_turn.take() else {
            // Lifecycle said a turn stage was running but the turn is gone;
            // nothing to interrupt.
            self.state.lifecycle = LifecycleState::Listening;
            return Ok(());
        };

        info!(
            turn_id = turn.turn_id,
            stage = ?turn.status,
            reply_chunks = turn.agent_reply_chunks.len(),
            "barge-in: interrupting active turn"
        );

        if let Some(token) = self.turn_cancel.take() {
            token.cancel();
        }
        self.clear_sink().await?;

        turn.status = TurnStatus::Interrupted;
        self.finish_turn(turn);
        self.state.lifecycle = LifecycleState::Listening;
        // A queued utterance waits only for the turn to end; the utterance
        // being spoken right now will queue behind it in arrival order.
        self.start_pending_if_any();
        Ok(())
    }

    fn on_speech_ended(&mut self, utterance: Utterance) -> Result<(), SessionError> {
        if self.state.current_turn.is_some() {
            // A turn is still winding down; hold exactly one utterance until
            // it reaches a terminal status.
            if self.pending_utterance.is_some() {
                warn!("replacing queued utterance with a newer one");
            }
            self.pending_utterance = Some(utterance);
            return Ok(());
        }
        if let Some(previous) = self.pending_utterance.take() {
            // An older utterance is still waiting its turn; keep arrival
            // order and queue the new one behind it.
            self.start_user_turn(previous);
            self.pending_utterance = Some(utterance);
            return Ok(());
        }
        self.start_user_turn(utterance);
        Ok(())
    }

    fn start_user_turn(&mut self, utterance: Utterance) {
        debug_assert!(
            self.state.current_turn.is_none(),
            "started a turn while another is active"
        );

        let turn_id = self.allocate_turn_id();
        let mut turn = Turn::new(turn_id);
        turn.status = TurnStatus::Transcribing;
        self.state.current_turn = Some(turn);
        self.state.lifecycle = LifecycleState::Transcribing;

        let cancel = CancellationToken::new();
        self.turn_cancel = Some(cancel.clone());

        debug!(
            turn_id,
            utterance_ms = utterance.duration().as_millis() as u64,
            "turn started: transcribing"
        );
        spawn_transcription(
            turn_id,
            utterance,
            Arc::clone(&self.transcriber),
            self.events_tx.clone(),
            cancel,
        );
    }

    /// Start a turn directly in the generating stage, seeded by an
    /// instruction instead of a transcribed utterance (session greeting).
    fn start_agent_turn(&mut self, seed: ReplySeed) {
        debug_assert!(
            self.state.current_turn.is_none(),
            "started a turn while another is active"
        );

        let turn_id = self.allocate_turn_id();
        let mut turn = Turn::new(turn_id);
        turn.status = TurnStatus::Generating;
        self.state.current_turn = Some(turn);
        self.state.lifecycle = LifecycleState::Generating;

        let cancel = CancellationToken::new();
        self.turn_cancel = Some(cancel.clone());

        debug!(turn_id, "turn started: agent-initiated");
        self.spawn_reply_pipeline(turn_id, seed, cancel);
    }

    fn spawn_reply_pipeline(&self, turn_id: TurnId, seed: ReplySeed, cancel: CancellationToken) {
        let context = ReplyContext::new(
            self.config.persona.clone(),
            self.state.history.snapshot(),
            seed,
        );
        spawn_reply(
            turn_id,
            context,
            Arc::clone(&self.generator),
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.sink),
            self.events_tx.clone(),
            cancel,
            self.config.barge_in,
        );
    }

    async fn on_stage_event(&mut self, event: StageEvent) -> Result<(), SessionError> {
        match event {
            StageEvent::TranscriptFragment {
                turn_id,
                text,
                is_final,
            } => {
                if self.is_active(turn_id) {
                    self.notify(SessionNotice::UserTranscript {
                        turn_id,
                        text,
                        is_final,
                    });
                }
                Ok(())
            }
            StageEvent::TranscriptComplete { turn_id, text } => {
                if !self.is_active(turn_id) {
                    debug!(turn_id, "dropping transcript for finished turn");
                    return Ok(());
                }
                self.on_transcript_complete(turn_id, text);
                Ok(())
            }
            StageEvent::TranscriptFailed { turn_id, error } => {
                if !self.is_active(turn_id) {
                    return Ok(());
                }
                self.fail_turn(StageFailure::Transcription(error)).await
            }
            StageEvent::ReplyChunk { turn_id, text } => {
                if let Some(turn) = self.active_turn_mut(turn_id) {
                    turn.agent_reply_chunks.push(text.clone());
                    self.notify(SessionNotice::AgentReplyChunk { turn_id, text });
                }
                Ok(())
            }
            StageEvent::SpeakingStarted { turn_id } => {
                if let Some(turn) = self.active_turn_mut(turn_id) {
                    turn.status = TurnStatus::Speaking;
                    self.state.lifecycle = LifecycleState::Speaking;
                    debug!(turn_id, "reply playback started");
                }
                Ok(())
            }
            StageEvent::TurnFinished { turn_id, outcome } => {
                if !self.is_active(turn_id) {
                    // Normal after barge-in: the cancelled pipeline reports a
                    // turn the orchestrator already recorded.
                    debug!(turn_id, ?outcome, "dropping outcome for finished turn");
                    return Ok(());
                }
                self.on_turn_finished(outcome).await
            }
        }
    }

    fn on_transcript_complete(&mut self, turn_id: TurnId, text: String) {
        let Some(turn) = self.state.current_turn.as_mut() else {
            return;
        };
        info!(turn_id, transcript = %text, "transcription complete");
        turn.user_text = text.clone();
        turn.status = TurnStatus::Generating;
        self.state.lifecycle = LifecycleState::Generating;

        let cancel = self
            .turn_cancel
            .clone()
            .unwrap_or_else(CancellationToken::new);
        self.spawn_reply_pipeline(turn_id, ReplySeed::UserText(text), cancel);
    }

    async fn on_turn_finished(&mut self, outcome: TurnOutcome) -> Result<(), SessionError> {
        match outcome {
            TurnOutcome::Completed => {
                let Some(mut turn) = self.state.current_turn.take() else {
                    return Ok(());
                };
                self.turn_cancel = None;
                info!(
                    turn_id = turn.turn_id,
                    reply_chunks = turn.agent_reply_chunks.len(),
                    "turn completed"
                );
                turn.status = TurnStatus::Completed;
                self.finish_turn(turn);
                self.settle_lifecycle();
                self.start_pending_if_any();
                Ok(())
            }
            TurnOutcome::Cancelled => {
                // The pipeline observed a cancellation the orchestrator did
                // not initiate through barge-in (e.g. shutdown). Preserve the
                // partial record as interrupted.
                let Some(mut turn) = self.state.current_turn.take() else {
                    return Ok(());
                };
                self.turn_cancel = None;
                turn.status = TurnStatus::Interrupted;
                self.finish_turn(turn);
                self.settle_lifecycle();
                self.start_pending_if_any();
                Ok(())
            }
            TurnOutcome::Failed(failure) => self.fail_turn(failure).await,
            TurnOutcome::Transport(transport_error) => {
                error!(error = %transport_error, "playback transport failed");
                self.close_out();
                Err(SessionError::Transport(transport_error))
            }
        }
    }

    /// Convert a stage failure into a failed turn, keep the session alive,
    /// and speak the configured fallback where feasible.
    async fn fail_turn(&mut self, failure: StageFailure) -> Result<(), SessionError> {
        if let Some(token) = self.turn_cancel.take() {
            token.cancel();
        }
        let Some(mut turn) = self.state.current_turn.take() else {
            return Ok(());
        };

        warn!(
            turn_id = turn.turn_id,
            error = %failure,
            "turn failed; session keeps listening"
        );
        turn.status = TurnStatus::Failed;

        // The synthesizer just failed: asking it to speak the fallback would
        // fail the same way.
        let synth_failed = matches!(failure, StageFailure::Synthesis(_));
        if let (Some(fallback), false) = (self.config.failure_fallback.clone(), synth_failed) {
            turn.agent_reply_chunks.push(fallback.clone());
            self.notify(SessionNotice::AgentReplyChunk {
                turn_id: turn.turn_id,
                text: fallback.clone(),
            });
            let cancel = CancellationToken::new();
            self.fallback_cancel = Some(cancel.clone());
            spawn_fallback_speech(
                fallback,
                Arc::clone(&self.synthesizer),
                Arc::clone(&self.sink),
                cancel,
            );
        }

        self.finish_turn(turn);
        self.settle_lifecycle();
        self.start_pending_if_any();
        Ok(())
    }

    /// Append a finished turn to history and notify subscribers.
    fn finish_turn(&mut self, turn: Turn) {
        debug_assert!(turn.status.is_terminal());
        self.notify(SessionNotice::TurnEnded {
            turn_id: turn.turn_id,
            status: turn.status,
        });
        self.state.history.append(turn);
    }

    fn settle_lifecycle(&mut self) {
        self.state.lifecycle = if self.vad.is_speaking() {
            LifecycleState::Listening
        } else {
            LifecycleState::Idle
        };
    }

    fn start_pending_if_any(&mut self) {
        if self.state.current_turn.is_some() {
            return;
        }
        if let Some(utterance) = self.pending_utterance.take() {
            debug!("starting queued utterance");
            self.start_user_turn(utterance);
        }
    }

    /// Tear down in-flight work at session end. An active turn is recorded
    /// as interrupted so history stays complete.
    fn close_out(&mut self) {
        if let Some(token) = self.turn_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.fallback_cancel.take() {
            token.cancel();
        }
        if let Some(mut turn) = self.state.current_turn.take() {
            turn.status = TurnStatus::Interrupted;
            self.finish_turn(turn);
        }
        self.pending_utterance = None;
        self.state.lifecycle = LifecycleState::Idle;
    }

    async fn clear_sink(&mut self) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        sink.clear().await.map_err(SessionError::Transport)
    }

    fn allocate_turn_id(&mut self) -> TurnId {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        id
    }

    fn is_active(&self, turn_id: TurnId) -> bool {
        self.state.active_turn_id() == Some(turn_id)
    }

    fn active_turn_mut(&mut self, turn_id: TurnId) -> Option<&mut Turn> {
        self.state
            .current_turn
            .as_mut()
            .filter(|turn| turn.turn_id == turn_id)
    }

    fn notify(&self, notice: SessionNotice) {
        // Err means no subscribers, which is fine.
        let _ = self.notices.send(notice);
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }
}

#[cfg(test)]
impl TurnOrchestrator {
    pub(crate) async fn test_speech_started(&mut self) -> Result<(), SessionError> {
        self.on_speech_started().await
    }

    pub(crate) fn test_speech_ended(&mut self, utterance: Utterance) -> Result<(), SessionError> {
        self.on_speech_ended(utterance)
    }

    pub(crate) async fn test_stage_event(&mut self, event: StageEvent) -> Result<(), SessionError> {
        self.on_stage_event(event).await
    }

    pub(crate) fn test_pending(&self) -> bool {
        self.pending_utterance.is_some()
    }
}
