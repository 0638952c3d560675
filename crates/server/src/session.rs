//! Session controller
//!
//! One [`Session`] per caller connection. It owns the pipeline task and the
//! conversation context, turns transport lifecycle signals into pipeline
//! operations, and tracks `Connecting -> Active -> Closing -> Closed`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use voice_bridge_config::Settings;
use voice_bridge_core::{AudioFrame, ControlSignal, Error, Frame, SampleRate, TranscriptEntry};
use voice_bridge_pipeline::{
    AlwaysComplete, AudioSink, ContextAggregatorPair, EnergyVad, EnergyVadConfig, LlmProcessor,
    Pipeline, PipelineTask, SemanticTurnAnalyzer, SttProcessor, TransportInput, TransportOutput,
    TtsProcessor, TurnAnalyzer, TurnCoordinatorConfig, UserAggregatorParams,
};

use crate::providers::Providers;
use crate::ServerError;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pipeline assembled, not yet running
    Connecting,
    Active,
    /// Cancellation in progress
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Parse a configured sample rate
pub(crate) fn sample_rate(hz: u32) -> Result<SampleRate, ServerError> {
    SampleRate::from_hz(hz)
        .ok_or_else(|| ServerError::Config(format!("unsupported sample rate {}", hz)))
}

/// One caller session
pub struct Session {
    stream_sid: String,
    task: Arc<PipelineTask>,
    context: ContextAggregatorPair,
    greeting: String,
    greeted: AtomicBool,
    state: Mutex<SessionState>,
    /// Set once the pipeline run has returned
    outcome: watch::Sender<Option<Result<(), Error>>>,
    created_at: Instant,
}

impl Session {
    /// Assemble the session's pipeline
    ///
    /// The transcript is seeded with the persona prompt before any stage runs.
    pub fn new(
        stream_sid: impl Into<String>,
        settings: &Settings,
        providers: &Providers,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Arc<Self>, ServerError> {
        let stream_sid = stream_sid.into();
        let input_rate = sample_rate(settings.audio.input_sample_rate)?;
        let output_rate = sample_rate(settings.audio.output_sample_rate)?;

        let analyzer: Arc<dyn TurnAnalyzer> = if settings.turn.semantic_enabled {
            Arc::new(SemanticTurnAnalyzer::new())
        } else {
            Arc::new(AlwaysComplete)
        };
        let (bot_tx, bot_rx) = watch::channel(false);
        let params = UserAggregatorParams {
            vad: Box::new(EnergyVad::new(EnergyVadConfig::from(&settings.turn))),
            analyzer,
            turn: TurnCoordinatorConfig {
                semantic_timeout: Duration::from_millis(settings.turn.semantic_timeout_ms),
                allow_interruptions: settings.pipeline.allow_interruptions,
            },
            bot_speaking: bot_rx,
        };
        let (context, user, assistant) =
            ContextAggregatorPair::new(settings.persona.system_prompt.clone(), params);

        let pipeline = Pipeline::builder("voice_bridge")
            .with_config(&settings.pipeline)
            .stage(TransportInput::new(input_rate))
            .stage(SttProcessor::new(Arc::clone(&providers.stt)))
            .stage(user)
            .stage(LlmProcessor::new(Arc::clone(&providers.llm), context.reader()))
            .stage(TtsProcessor::new(Arc::clone(&providers.tts)))
            .stage(TransportOutput::new(sink, output_rate, bot_tx))
            .stage(assistant)
            .build()
            .map_err(|e| ServerError::Session(e.to_string()))?;

        tracing::debug!(
            stream_sid = %stream_sid,
            stages = ?pipeline.stage_names(),
            "Session pipeline assembled"
        );

        let (outcome, _) = watch::channel(None);
        Ok(Arc::new(Self {
            task: Arc::new(pipeline.into_task(stream_sid.clone())),
            stream_sid,
            context,
            greeting: settings.persona.greeting_instruction.clone(),
            greeted: AtomicBool::new(false),
            state: Mutex::new(SessionState::Connecting),
            outcome,
            created_at: Instant::now(),
        }))
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Transcript snapshot
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.context.snapshot()
    }

    /// Start the pipeline; only the first call has an effect
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Connecting {
                return;
            }
            *state = SessionState::Active;
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let result = session.task.run().await;
            match &result {
                Ok(()) => tracing::info!(stream_sid = %session.stream_sid, "Session pipeline finished"),
                Err(e) => tracing::error!(
                    stream_sid = %session.stream_sid,
                    error = %e,
                    "Session pipeline failed"
                ),
            }
            *session.state.lock() = SessionState::Closed;
            session.outcome.send_replace(Some(result));
        });

        tracing::info!(stream_sid = %self.stream_sid, "Session started");
    }

    /// Seed the greeting instruction and ask the assistant to speak first
    ///
    /// At most one greeting is queued per session.
    pub async fn on_client_connected(&self) -> voice_bridge_core::Result<()> {
        if self.state() != SessionState::Active {
            tracing::debug!(
                stream_sid = %self.stream_sid,
                state = self.state().as_str(),
                "Ignoring connect for inactive session"
            );
            return Ok(());
        }
        if self.greeted.swap(true, Ordering::AcqRel) {
            tracing::debug!(stream_sid = %self.stream_sid, "Greeting already queued");
            return Ok(());
        }

        tracing::info!(stream_sid = %self.stream_sid, "Client connected");
        self.context.seed_system(self.greeting.clone());
        self.task
            .queue(Frame::Control(ControlSignal::RunConversation))
            .await
    }

    /// Cancel the pipeline and close the session
    pub async fn on_client_disconnected(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Closing | SessionState::Closed => return,
                _ => *state = SessionState::Closing,
            }
        }

        tracing::info!(stream_sid = %self.stream_sid, "Client disconnected");
        self.task.cancel().await;
        *self.state.lock() = SessionState::Closed;
    }

    /// Feed caller audio into the pipeline head
    pub async fn push_audio(&self, frame: AudioFrame) -> voice_bridge_core::Result<()> {
        self.task.queue(Frame::AudioChunk(frame)).await
    }

    /// Wait until the pipeline run returns
    pub async fn finished(&self) -> voice_bridge_core::Result<()> {
        let mut rx = self.outcome.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(Error::ChannelClosed),
        };
        result
    }
}

/// Registry of live sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.sessions.read().len() < self.max_sessions
    }

    /// Fail with `Capacity` when no further call can be accepted
    pub fn ensure_capacity(&self) -> Result<(), ServerError> {
        if self.has_capacity() {
            Ok(())
        } else {
            Err(ServerError::Capacity(self.max_sessions))
        }
    }

    /// Register a session under its stream id
    pub fn insert(&self, session: Arc<Session>) -> Result<(), ServerError> {
        let count = {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Capacity(self.max_sessions));
            }
            if sessions.contains_key(session.stream_sid()) {
                return Err(ServerError::Session(format!(
                    "stream {} already has a session",
                    session.stream_sid()
                )));
            }
            sessions.insert(session.stream_sid().to_string(), session);
            sessions.len()
        };
        crate::metrics::set_active_sessions(count);
        Ok(())
    }

    pub fn remove(&self, stream_sid: &str) -> Option<Arc<Session>> {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            (sessions.remove(stream_sid), sessions.len())
        };
        crate::metrics::set_active_sessions(count);
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}
