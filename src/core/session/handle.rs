//! The session handle exposed to the supervisor.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::audio::{AudioFrameSource, PlaybackSink};
use crate::core::llm::ReplyGenerator;
use crate::core::stt::Transcriber;
use crate::core::tts::Synthesizer;
use crate::core::turn::SessionState;
use crate::errors::SessionError;

use super::events::{SessionNotice, StageEvent};
use super::orchestrator::TurnOrchestrator;

/// Capacity of the single-consumer stage-event channel. Generous relative to
/// per-turn event volume so stage tasks never stall on a busy control loop.
const STAGE_EVENT_CAPACITY: usize = 256;

/// Capacity of the outward notice broadcast. Slow subscribers lag and lose
/// old notices instead of backpressuring the session.
const NOTICE_CAPACITY: usize = 64;

/// Both directions of the media transport collaborator.
pub struct SessionTransport {
    pub source: Box<dyn AudioFrameSource>,
    pub sink: Box<dyn PlaybackSink>,
}

/// The provider collaborators selected for a session, one per capability.
pub struct SessionProviders {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// A live voice session.
///
/// Created by [`Session::start`], which validates configuration, spawns the
/// orchestrator control loop, and, when a greeting is configured, opens
/// with an agent-initiated turn. The supervisor ends the session with
/// [`Session::close`], which returns the final session state.
pub struct Session {
    id: Uuid,
    shutdown: CancellationToken,
    notices: broadcast::Sender<SessionNotice>,
    control_loop: JoinHandle<Result<SessionState, SessionError>>,
}

impl Session {
    /// Validate configuration and start the session's control loop.
    ///
    /// Fails fast with [`SessionError::Configuration`] before any turn
    /// begins if the configuration is invalid.
    pub fn start(
        config: SessionConfig,
        transport: SessionTransport,
        providers: SessionProviders,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            stt_model = providers.transcriber.model(),
            llm_model = providers.generator.model(),
            tts_model = providers.synthesizer.model(),
            sample_rate = transport.source.sample_rate(),
            greeting = config.greeting_instructions.is_some(),
            "voice session starting"
        );

        let (events_tx, events_rx) = mpsc::channel::<StageEvent>(STAGE_EVENT_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shutdown = CancellationToken::new();

        let orchestrator = TurnOrchestrator::new(
            config,
            Arc::new(Mutex::new(transport.sink)),
            providers.transcriber,
            providers.generator,
            providers.synthesizer,
            events_tx,
            notices.clone(),
            shutdown.clone(),
        );

        let control_loop = tokio::spawn(orchestrator.run(transport.source, events_rx));

        Ok(Self {
            id,
            shutdown,
            notices,
            control_loop,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to transcript/reply/turn notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Whether the control loop is still running.
    pub fn is_active(&self) -> bool {
        !self.control_loop.is_finished()
    }

    /// Shut the session down and return its final state.
    ///
    /// An active turn is recorded as interrupted before the state is
    /// returned. If the session already ended on a transport error, that
    /// error is returned here.
    pub async fn close(mut self) -> Result<SessionState, SessionError> {
        info!(session_id = %self.id, "closing voice session");
        self.shutdown.cancel();
        // Awaited by reference: Session implements Drop, so the handle field
        // cannot be moved out.
        (&mut self.control_loop)
            .await
            .map_err(|join_error| SessionError::Terminated(join_error.to_string()))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Ensure the control loop winds down if the handle is dropped
        // without an explicit close.
        self.shutdown.cancel();
    }
}
