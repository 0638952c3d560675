//! Transport edge stages
//!
//! [`TransportInput`] heads the pipeline; the session feeds it decoded caller
//! audio through the pipeline task. [`TransportOutput`] hands synthesized
//! audio to an [`AudioSink`] and publishes whether the assistant is audible.
//!
//! Between a raised barge-in and its `Interruption` frame the output drops
//! the stale response's audio and text, so neither reaches the caller or the
//! transcript.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voice_bridge_core::{
    AudioFrame, ControlSignal, Frame, FrameProcessor, ProcessorContext, Result, SampleRate,
    StageRole,
};

use super::InterruptCursor;

/// Outbound audio destination (the caller's connection)
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Deliver one frame of assistant audio
    async fn send_audio(&self, frame: &AudioFrame) -> Result<()>;

    /// Drop audio the caller has buffered but not yet played
    async fn clear(&self) -> Result<()>;

    /// Release the connection; further sends fail
    async fn close(&self) -> Result<()>;
}

/// Pipeline head for caller audio
pub struct TransportInput {
    sample_rate: SampleRate,
}

impl TransportInput {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self { sample_rate }
    }
}

#[async_trait]
impl FrameProcessor for TransportInput {
    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        match frame {
            Frame::AudioChunk(audio) if audio.sample_rate != self.sample_rate => {
                tracing::warn!(
                    expected = self.sample_rate.as_u32(),
                    got = audio.sample_rate.as_u32(),
                    "Dropping inbound audio at unexpected sample rate"
                );
                Ok(())
            }
            Frame::Control(ControlSignal::EndOfSession) => Ok(()),
            other => ctx.push(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "transport_input"
    }

    fn role(&self) -> StageRole {
        StageRole::AudioInput
    }
}

struct Playback {
    /// When the audio sent so far finishes playing at the caller
    deadline: Option<Instant>,
    /// Pending "bot stopped speaking" timer
    stop_timer: Option<JoinHandle<()>>,
    /// Audio was sent since the current response started
    audible: bool,
}

/// Pipeline tail for assistant audio
pub struct TransportOutput {
    sink: Arc<dyn AudioSink>,
    sample_rate: SampleRate,
    bot_speaking: Arc<watch::Sender<bool>>,
    playback: Mutex<Playback>,
    interrupts: InterruptCursor,
}

impl TransportOutput {
    pub fn new(
        sink: Arc<dyn AudioSink>,
        sample_rate: SampleRate,
        bot_speaking: watch::Sender<bool>,
    ) -> Self {
        Self {
            sink,
            sample_rate,
            bot_speaking: Arc::new(bot_speaking),
            playback: Mutex::new(Playback {
                deadline: None,
                stop_timer: None,
                audible: false,
            }),
            interrupts: InterruptCursor::default(),
        }
    }

    fn set_speaking(&self, speaking: bool) {
        self.bot_speaking.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        });
    }

    /// Extend the playback deadline by one frame
    fn on_audio_sent(&self, duration: Duration) {
        let mut playback = self.playback.lock();
        if let Some(timer) = playback.stop_timer.take() {
            timer.abort();
        }
        let now = Instant::now();
        let base = playback.deadline.filter(|d| *d > now).unwrap_or(now);
        playback.deadline = Some(base + duration);
        playback.audible = true;
    }

    /// A response that produced no audio still ends the system turn
    fn on_response_end(&self) {
        let silent = !std::mem::take(&mut self.playback.lock().audible);
        if silent && !*self.bot_speaking.borrow() {
            self.bot_speaking.send_replace(false);
        }
    }

    /// Flip to "not speaking" once buffered audio has played out
    fn schedule_stop(&self) {
        let mut playback = self.playback.lock();
        let deadline = playback.deadline.take().unwrap_or_else(Instant::now);
        let bot_speaking = Arc::clone(&self.bot_speaking);
        if let Some(timer) = playback.stop_timer.take() {
            timer.abort();
        }
        playback.stop_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            bot_speaking.send_replace(false);
        }));
    }

    fn reset_playback(&self) {
        let mut playback = self.playback.lock();
        playback.deadline = None;
        playback.audible = false;
        if let Some(timer) = playback.stop_timer.take() {
            timer.abort();
        }
    }
}

#[async_trait]
impl FrameProcessor for TransportOutput {
    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        let stale = self.interrupts.is_stale(ctx);
        match frame {
            Frame::SynthesizedAudio(_) | Frame::GeneratedText { .. } if stale => Ok(()),
            Frame::SynthesizedAudio(audio) => {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                if audio.sample_rate != self.sample_rate {
                    tracing::warn!(
                        expected = self.sample_rate.as_u32(),
                        got = audio.sample_rate.as_u32(),
                        "Synthesized audio at unexpected sample rate"
                    );
                }
                self.sink.send_audio(&audio).await?;
                self.on_audio_sent(audio.duration);
                self.set_speaking(true);
                Ok(())
            }
            Frame::Control(ControlSignal::TtsStopped) => {
                self.schedule_stop();
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::LlmResponseStart) => {
                self.playback.lock().audible = false;
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::LlmResponseEnd) => {
                self.on_response_end();
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::Interruption) => {
                self.interrupts.advance(ctx);
                self.reset_playback();
                if !ctx.is_cancelled() {
                    self.sink.clear().await?;
                }
                self.set_speaking(false);
                ctx.push(frame).await
            }
            Frame::AudioChunk(_) => Ok(()),
            Frame::Control(ControlSignal::EndOfSession) => Ok(()),
            other => ctx.push(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "transport_output"
    }

    fn role(&self) -> StageRole {
        StageRole::AudioOutput
    }

    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        self.reset_playback();
        self.set_speaking(false);
        self.sink.close().await
    }
}
