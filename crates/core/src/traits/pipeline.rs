//! Pipeline processing traits

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::{AudioFrame, Error, Result, StageError};

/// Frame types that flow through the pipeline
///
/// Frames are immutable values. A stage that transforms a frame emits a new one.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Inbound caller audio
    AudioChunk(AudioFrame),

    /// Speech-to-text output; after user aggregation, one consolidated utterance
    TranscribedText { text: String, is_final: bool },

    /// Language model output fragment
    GeneratedText { text: String },

    /// Synthesized assistant audio
    SynthesizedAudio(AudioFrame),

    /// Control frame for pipeline and turn management
    Control(ControlSignal),
}

/// Control signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Ask the language stage to respond using the current transcript
    RunConversation,
    /// Terminal frame; every stage drains and exits after forwarding it
    EndOfSession,
    /// Language stage started streaming a response
    LlmResponseStart,
    /// Language stage finished its turn
    LlmResponseEnd,
    /// Synthesis of a response began
    TtsStarted,
    /// Synthesis of a response finished
    TtsStopped,
    /// Voice activity started
    UserStartedSpeaking,
    /// Voice activity stopped for longer than the silence threshold
    UserStoppedSpeaking,
    /// User barged in; in-flight assistant output must be dropped
    Interruption,
    /// First assistant audio of a response reached the transport
    BotStartedSpeaking,
    /// Last assistant audio of a response reached the transport
    BotStoppedSpeaking,
    /// Outcome of a semantic turn-completion check for one silence episode
    TurnCheck { epoch: u64, outcome: TurnCheckOutcome },
}

/// How a pending user turn was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCheckOutcome {
    /// The analyzer judged the utterance complete
    Confirmed,
    /// The analyzer did not confirm within the fallback window
    TimedOut,
}

impl Frame {
    /// Check if this is the terminal frame
    pub fn is_end_of_session(&self) -> bool {
        matches!(self, Frame::Control(ControlSignal::EndOfSession))
    }

    /// Check if this frame carries assistant audio
    pub fn is_synthesized_audio(&self) -> bool {
        matches!(self, Frame::SynthesizedAudio(_))
    }

    /// Frame kind for tracing
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::AudioChunk(_) => "audio_chunk",
            Frame::TranscribedText { .. } => "transcribed_text",
            Frame::GeneratedText { .. } => "generated_text",
            Frame::SynthesizedAudio(_) => "synthesized_audio",
            Frame::Control(signal) => signal.name(),
        }
    }
}

impl ControlSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::RunConversation => "run_conversation",
            ControlSignal::EndOfSession => "end_of_session",
            ControlSignal::LlmResponseStart => "llm_response_start",
            ControlSignal::LlmResponseEnd => "llm_response_end",
            ControlSignal::TtsStarted => "tts_started",
            ControlSignal::TtsStopped => "tts_stopped",
            ControlSignal::UserStartedSpeaking => "user_started_speaking",
            ControlSignal::UserStoppedSpeaking => "user_stopped_speaking",
            ControlSignal::Interruption => "interruption",
            ControlSignal::BotStartedSpeaking => "bot_started_speaking",
            ControlSignal::BotStoppedSpeaking => "bot_stopped_speaking",
            ControlSignal::TurnCheck { .. } => "turn_check",
        }
    }
}

/// Position-relevant role of a stage within a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    /// Transport edge receiving caller audio; always first
    AudioInput,
    /// Any intermediate processing stage
    Processor,
    /// Transport edge emitting assistant audio
    AudioOutput,
    /// Transcript writer placed after the audio output
    ContextSink,
}

/// Pipeline-wide cancellation flag shared by every sink of one pipeline
#[derive(Debug, Clone, Default)]
pub struct CancelGate(Arc<AtomicBool>);

impl CancelGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate; returns false if it was already closed
    pub fn close(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline-wide barge-in counter
///
/// The stage that detects a barge-in raises the signal before pushing the
/// `Interruption` frame. Stages stuck behind a backlog compare the count
/// with the interruptions they have already seen in-band and drop stale
/// response frames until the frame itself arrives.
#[derive(Debug, Clone)]
pub struct InterruptSignal(Arc<watch::Sender<u64>>);

impl Default for InterruptSignal {
    fn default() -> Self {
        Self(Arc::new(watch::channel(0).0))
    }
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more interruption; returns the new count
    pub fn raise(&self) -> u64 {
        let mut raised = 0;
        self.0.send_modify(|count| {
            *count += 1;
            raised = *count;
        });
        raised
    }

    /// Interruptions raised so far
    pub fn raised(&self) -> u64 {
        *self.0.borrow()
    }

    /// Resolves once more than `seen` interruptions have been raised
    pub async fn raised_beyond(&self, seen: u64) {
        let mut rx = self.0.subscribe();
        while *rx.borrow_and_update() <= seen {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending half of a stage channel, gated by pipeline cancellation
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    gate: CancelGate,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<Frame>, gate: CancelGate) -> Self {
        Self { tx, gate }
    }

    /// Send a frame, refusing once cancellation has begun
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.gate.is_closed() {
            return Err(Error::Cancelled);
        }
        self.tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_closed()
    }
}

/// Context passed to frame processors
///
/// Cheap to clone; every clone pushes into the same channels.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Session (stream) identifier
    pub session_id: String,
    /// Name of the stage owning this context
    pub stage_name: &'static str,
    downstream: FrameSink,
    loopback: FrameSink,
    errors: mpsc::UnboundedSender<StageError>,
    interrupts: InterruptSignal,
}

impl ProcessorContext {
    pub fn new(
        session_id: impl Into<String>,
        stage_name: &'static str,
        downstream: FrameSink,
        loopback: FrameSink,
        errors: mpsc::UnboundedSender<StageError>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage_name,
            downstream,
            loopback,
            errors,
            interrupts: InterruptSignal::new(),
        }
    }

    /// Share one interruption signal across the stages of a pipeline
    pub fn with_interrupts(mut self, interrupts: InterruptSignal) -> Self {
        self.interrupts = interrupts;
        self
    }

    /// Emit a frame to the next stage
    pub async fn push(&self, frame: Frame) -> Result<()> {
        self.downstream.send(frame).await
    }

    /// Re-enqueue a frame at the tail of this stage's own input
    pub async fn push_self(&self, frame: Frame) -> Result<()> {
        self.loopback.send(frame).await
    }

    /// Raise the interruption signal, then push `Interruption` downstream
    pub async fn push_interruption(&self) -> Result<()> {
        self.interrupts.raise();
        self.push(Frame::Control(ControlSignal::Interruption)).await
    }

    pub fn interrupts(&self) -> &InterruptSignal {
        &self.interrupts
    }

    /// Report a session-fatal failure from a task spawned by this stage
    pub fn report_error(&self, cause: impl ToString) {
        let _ = self.errors.send(StageError::new(self.stage_name, cause));
    }

    /// Whether pipeline cancellation has begun
    pub fn is_cancelled(&self) -> bool {
        self.downstream.is_cancelled()
    }
}

/// Frame processor for pipeline stages
///
/// Each processor receives frames in FIFO order and pushes zero or more
/// output frames through the context, either inline or from tasks it spawns.
/// Processors run in separate tokio tasks, connected by channels.
#[async_trait]
pub trait FrameProcessor: Send + Sync + 'static {
    /// Process one frame
    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()>;

    /// Get processor name for tracing
    fn name(&self) -> &'static str;

    /// Position-relevant role checked by the pipeline builder
    fn role(&self) -> StageRole {
        StageRole::Processor
    }

    /// Called once before the first frame
    async fn on_start(&self, _ctx: &ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the stage loop exits; must release held resources
    /// and return promptly even if work was in flight
    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        Ok(())
    }
}
