//! Cancellable stage tasks: transcription, and the streaming
//! generation → synthesis → playback pipeline of one turn.
//!
//! Every task races its provider stream against the turn's cancellation
//! token, so cancellation is observed at the next await point rather than
//! after a stage completes. Results flow back to the orchestrator through
//! the stage-event channel; tasks never touch session state directly.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BargeInPolicy;
use crate::core::audio::{PlaybackSink, Utterance};
use crate::core::llm::{ReplyContext, ReplyGenerator};
use crate::core::stt::Transcriber;
use crate::core::tts::Synthesizer;
use crate::core::turn::TurnId;

use super::events::{StageEvent, StageFailure, TurnOutcome};

/// Capacity of the per-turn text chunk channel between generation and
/// synthesis. Generation may run ahead of synthesis by this many chunks.
const REPLY_CHUNK_CAPACITY: usize = 32;

/// Shared handle to the playback sink.
///
/// The orchestrator clears it on barge-in while a pipeline task may be
/// playing, so it sits behind an async mutex.
pub(crate) type SharedSink = Arc<Mutex<Box<dyn PlaybackSink>>>;

/// Spawn the transcription stage for one turn.
///
/// Drains the provider's fragment stream, forwarding fragments as events and
/// accumulating final text. Emits `TranscriptComplete` on success or
/// `TranscriptFailed` on provider error; emits nothing further once the
/// cancellation token fires.
pub(crate) fn spawn_transcription(
    turn_id: TurnId,
    utterance: Utterance,
    transcriber: Arc<dyn Transcriber>,
    events: mpsc::Sender<StageEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = transcriber.transcribe(utterance);
        let mut final_text = String::new();
        let mut last_interim = String::new();

        loop {
            let fragment = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(turn_id, "transcription cancelled");
                    return;
                }
                fragment = stream.next() => fragment,
            };

            match fragment {
                Some(Ok(fragment)) => {
                    if fragment.is_final {
                        final_text.push_str(&fragment.text);
                    } else {
                        last_interim = fragment.text.clone();
                    }
                    let _ = events
                        .send(StageEvent::TranscriptFragment {
                            turn_id,
                            text: fragment.text,
                            is_final: fragment.is_final,
                        })
                        .await;
                }
                Some(Err(error)) => {
                    let _ = events
                        .send(StageEvent::TranscriptFailed { turn_id, error })
                        .await;
                    return;
                }
                None => break,
            }
        }

        // Providers that never mark fragments final still produce usable
        // text: fall back to the last interim result.
        let text = if final_text.trim().is_empty() {
            last_interim
        } else {
            final_text
        };

        let _ = events
            .send(StageEvent::TranscriptComplete {
                turn_id,
                text: text.trim().to_string(),
            })
            .await;
    })
}

/// Spawn the reply pipeline for one turn: generation feeding synthesis
/// feeding playback, all overlapping.
///
/// Text chunks cross a bounded channel from the generation sub-task to the
/// synthesis loop, so audio for chunk *n* plays while chunk *n+1* is still
/// being generated. Ordering is preserved end to end.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_reply(
    turn_id: TurnId,
    context: ReplyContext,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: SharedSink,
    events: mpsc::Sender<StageEvent>,
    cancel: CancellationToken,
    policy: BargeInPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = run_reply(
            turn_id,
            context,
            generator,
            synthesizer,
            sink,
            events.clone(),
            cancel,
            policy,
        )
        .await;
        let _ = events
            .send(StageEvent::TurnFinished { turn_id, outcome })
            .await;
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_reply(
    turn_id: TurnId,
    context: ReplyContext,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: SharedSink,
    events: mpsc::Sender<StageEvent>,
    cancel: CancellationToken,
    policy: BargeInPolicy,
) -> TurnOutcome {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(REPLY_CHUNK_CAPACITY);

    // Generation sub-task: drains the provider stream, records each chunk
    // on the turn (via the orchestrator), and forwards it to synthesis.
    let generation = tokio::spawn({
        let events = events.clone();
        let cancel = cancel.clone();
        async move {
            let mut stream = generator.generate(context);
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    chunk = stream.next() => chunk,
                };
                match chunk {
                    Some(Ok(text)) => {
                        let _ = events
                            .send(StageEvent::ReplyChunk {
                                turn_id,
                                text: text.clone(),
                            })
                            .await;
                        if chunk_tx.send(text).await.is_err() {
                            // Synthesis side ended first; nothing left to feed.
                            return Ok(());
                        }
                    }
                    Some(Err(error)) => return Err(error),
                    None => return Ok(()),
                }
            }
        }
    });

    let mut speaking = false;
    let mut cancelled = false;

    'chunks: loop {
        // Cancellation always wins over pending work, so nothing new starts
        // after the token fires.
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break 'chunks;
            }
            text = chunk_rx.recv() => match text {
                Some(text) => text,
                None => break 'chunks,
            },
        };

        let mut audio = synthesizer.synthesize(&text);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break 'chunks;
                }
                chunk = audio.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    if !speaking {
                        speaking = true;
                        let _ = events.send(StageEvent::SpeakingStarted { turn_id }).await;
                    }
                    let mut sink = sink.lock().await;
                    let played = match policy {
                        BargeInPolicy::CutImmediately => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    cancelled = true;
                                    break 'chunks;
                                }
                                result = sink.play(chunk) => result,
                            }
                        }
                        // Let the in-flight chunk finish; cancellation is
                        // observed before the next one starts.
                        BargeInPolicy::FinishChunk => sink.play(chunk).await,
                    };
                    if let Err(error) = played {
                        generation.abort();
                        return TurnOutcome::Transport(error);
                    }
                }
                Some(Err(error)) => {
                    generation.abort();
                    return TurnOutcome::Failed(StageFailure::Synthesis(error));
                }
                None => break,
            }
        }
    }

    if cancelled {
        debug!(turn_id, "reply pipeline cancelled");
        generation.abort();
        return TurnOutcome::Cancelled;
    }

    // Chunk channel drained: surface how generation itself ended.
    match generation.await {
        Ok(Ok(())) => TurnOutcome::Completed,
        Ok(Err(error)) => TurnOutcome::Failed(StageFailure::Generation(error)),
        Err(join_error) => {
            warn!(turn_id, error = %join_error, "generation task aborted unexpectedly");
            TurnOutcome::Cancelled
        }
    }
}

/// Spawn a best-effort fallback utterance after a failed turn.
///
/// Runs outside any turn record (the text was already recorded on the failed
/// turn) and is cancelled by the next barge-in or session close. Errors are
/// logged and swallowed: the fallback is a courtesy, not a contract.
pub(crate) fn spawn_fallback_speech(
    text: String,
    synthesizer: Arc<dyn Synthesizer>,
    sink: SharedSink,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut audio = synthesizer.synthesize(&text);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                chunk = audio.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    let mut sink = sink.lock().await;
                    let played = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        result = sink.play(chunk) => result,
                    };
                    if let Err(error) = played {
                        warn!(error = %error, "fallback playback failed");
                        return;
                    }
                }
                Some(Err(error)) => {
                    warn!(error = %error, "fallback synthesis failed");
                    return;
                }
                None => return,
            }
        }
    })
}
