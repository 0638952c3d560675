//! User context aggregator
//!
//! Gates user speech on the turn coordinator. Fragments are held until the
//! turn ends, then sealed into one transcript entry and forwarded as a single
//! consolidated `TranscribedText` frame.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use voice_bridge_core::{
    ControlSignal, Frame, FrameProcessor, ProcessorContext, Result, TranscriptEntry,
    TurnCheckOutcome,
};

use super::transcript::TranscriptWriter;
use crate::turn_detection::{
    TurnAction, TurnAnalyzer, TurnCoordinator, TurnCoordinatorConfig, TurnState, VadEvent,
    VoiceActivityDetector,
};

/// User aggregator parameters
pub struct UserAggregatorParams {
    /// Fast speech start/stop detector
    pub vad: Box<dyn VoiceActivityDetector>,
    /// Turn-completion analyzer
    pub analyzer: Arc<dyn TurnAnalyzer>,
    /// Coordinator timing and interruption policy
    pub turn: TurnCoordinatorConfig,
    /// Set by the audio output while assistant audio is playing
    pub bot_speaking: watch::Receiver<bool>,
}

struct UserState {
    vad: Box<dyn VoiceActivityDetector>,
    coordinator: TurnCoordinator,
}

/// User context aggregator
pub struct UserContextAggregator {
    state: Mutex<UserState>,
    analyzer: Arc<dyn TurnAnalyzer>,
    semantic_timeout: Duration,
    writer: TranscriptWriter,
    bot_speaking: watch::Receiver<bool>,
    /// Fallback timers, analyzer runs and the bot-speaking relay
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UserContextAggregator {
    pub(crate) fn new(writer: TranscriptWriter, params: UserAggregatorParams) -> Self {
        Self {
            semantic_timeout: params.turn.semantic_timeout,
            state: Mutex::new(UserState {
                vad: params.vad,
                coordinator: TurnCoordinator::new(params.turn),
            }),
            analyzer: params.analyzer,
            writer,
            bot_speaking: params.bot_speaking,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current turn state
    pub fn turn_state(&self) -> TurnState {
        self.state.lock().coordinator.state()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn apply(&self, actions: Vec<TurnAction>, ctx: &ProcessorContext) -> Result<()> {
        for action in actions {
            match action {
                TurnAction::ArmFallback { epoch, after } => {
                    let ctx = ctx.clone();
                    self.track(tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = ctx
                            .push_self(Frame::Control(ControlSignal::TurnCheck {
                                epoch,
                                outcome: TurnCheckOutcome::TimedOut,
                            }))
                            .await;
                    }));
                }
                TurnAction::Analyze { epoch, text } => {
                    let ctx = ctx.clone();
                    let analyzer = Arc::clone(&self.analyzer);
                    let window = self.semantic_timeout;
                    self.track(tokio::spawn(async move {
                        match tokio::time::timeout(window, analyzer.analyze(&text)).await {
                            Ok(Ok(analysis)) if analysis.is_complete() => {
                                let _ = ctx
                                    .push_self(Frame::Control(ControlSignal::TurnCheck {
                                        epoch,
                                        outcome: TurnCheckOutcome::Confirmed,
                                    }))
                                    .await;
                            }
                            Ok(Ok(analysis)) => {
                                tracing::trace!(epoch, class = ?analysis.class, "Utterance not complete");
                            }
                            Ok(Err(e)) => {
                                tracing::debug!(epoch, error = %e, analyzer = analyzer.name(), "Turn analysis failed");
                            }
                            Err(_) => {
                                tracing::debug!(epoch, analyzer = analyzer.name(), "Turn analysis exceeded window");
                            }
                        }
                    }));
                }
                TurnAction::SealUserTurn { text, reason } => {
                    self.writer.append(TranscriptEntry::user(text.clone()));
                    metrics::counter!("voice_bridge_turns_total", "reason" => reason.as_str())
                        .increment(1);
                    tracing::debug!(
                        session_id = %ctx.session_id,
                        reason = reason.as_str(),
                        chars = text.len(),
                        "User turn sealed"
                    );
                    ctx.push(Frame::TranscribedText {
                        text,
                        is_final: true,
                    })
                    .await?;
                }
                TurnAction::Interrupt => {
                    metrics::counter!("voice_bridge_interruptions_total").increment(1);
                    tracing::debug!(session_id = %ctx.session_id, "User interrupted assistant");
                    ctx.push_interruption().await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for UserContextAggregator {
    async fn on_start(&self, ctx: &ProcessorContext) -> Result<()> {
        // Relay bot-speaking changes into our own input so they are ordered
        // with the audio and transcripts the coordinator sees.
        let mut rx = self.bot_speaking.clone();
        let ctx = ctx.clone();
        self.track(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let speaking = *rx.borrow_and_update();
                let signal = if speaking {
                    ControlSignal::BotStartedSpeaking
                } else {
                    ControlSignal::BotStoppedSpeaking
                };
                if ctx.push_self(Frame::Control(signal)).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        match frame {
            Frame::AudioChunk(audio) => {
                let (event, actions) = {
                    let mut state = self.state.lock();
                    match state.vad.process_frame(&audio) {
                        Some(event) => (Some(event), state.coordinator.on_vad(event)),
                        None => (None, vec![]),
                    }
                };
                match event {
                    Some(VadEvent::SpeechStarted) => {
                        ctx.push(Frame::Control(ControlSignal::UserStartedSpeaking))
                            .await?
                    }
                    Some(VadEvent::SpeechStopped) => {
                        ctx.push(Frame::Control(ControlSignal::UserStoppedSpeaking))
                            .await?
                    }
                    None => {}
                }
                self.apply(actions, ctx).await
            }
            Frame::TranscribedText { text, is_final } => {
                let actions = self.state.lock().coordinator.on_transcript(&text, is_final);
                self.apply(actions, ctx).await
            }
            Frame::Control(ControlSignal::TurnCheck { epoch, outcome }) => {
                let actions = self.state.lock().coordinator.on_turn_check(epoch, outcome);
                self.apply(actions, ctx).await
            }
            Frame::Control(ControlSignal::BotStartedSpeaking) => {
                let actions = self.state.lock().coordinator.on_bot_started_speaking();
                self.apply(actions, ctx).await
            }
            Frame::Control(ControlSignal::BotStoppedSpeaking) => {
                let actions = self.state.lock().coordinator.on_bot_stopped_speaking();
                self.apply(actions, ctx).await
            }
            Frame::Control(ControlSignal::RunConversation) => {
                self.state.lock().coordinator.on_response_requested();
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::EndOfSession) => Ok(()),
            other => ctx.push(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "user_aggregator"
    }

    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.state.lock().vad.reset();
        Ok(())
    }
}
