//! Frame pipeline for duplex voice conversations
//!
//! This crate provides:
//! - Turn detection (energy VAD, semantic analyzer, turn coordinator)
//! - The context aggregator pair that owns the conversation transcript
//! - Stage adapters for transport edges, STT, LLM and TTS
//! - Pipeline assembly and the per-session runtime
//! - HTTP speech providers

pub mod aggregators;
pub mod pipeline;
pub mod processors;
pub mod stt;
pub mod tts;
pub mod turn_detection;

pub use aggregators::{
    AssistantContextAggregator, ContextAggregatorPair, TranscriptReader, UserAggregatorParams,
    UserContextAggregator,
};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineTask};
pub use processors::{
    AudioSink, LlmProcessor, SentenceSplitter, SentenceSplitterConfig, SttProcessor,
    TransportInput, TransportOutput, TtsProcessor,
};
pub use stt::{HttpStt, HttpSttConfig};
pub use tts::{HttpTts, HttpTtsConfig};
pub use turn_detection::{
    AlwaysComplete, CompletenessClass, EnergyVad, EnergyVadConfig, SemanticTurnAnalyzer,
    TurnAction, TurnAnalysis, TurnAnalyzer, TurnCoordinator, TurnCoordinatorConfig,
    TurnEndReason, TurnState, VadEvent, VoiceActivityDetector,
};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Pipeline assembly error: {0}")]
    Assembly(String),
}

impl From<PipelineError> for voice_bridge_core::Error {
    fn from(err: PipelineError) -> Self {
        use voice_bridge_core::Error;

        match err {
            PipelineError::Stt(msg) => Error::Provider(format!("stt: {}", msg)),
            PipelineError::Tts(msg) => Error::Provider(format!("tts: {}", msg)),
            PipelineError::Assembly(msg) => Error::Config(msg),
        }
    }
}

/// Shared fixtures for unit tests
#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use voice_bridge_core::{
        AudioFrame, AudioStream, CancelGate, Frame, FrameProcessor, FrameSink, GenerationStats,
        LanguageModel, ProcessorContext, Result, SampleRate, SpeechToText, StageRole,
        SynthesisStream, TextToSpeech, TranscriptEntry, TranscriptResult, TranscriptStream,
    };

    use crate::aggregators::UserAggregatorParams;
    use crate::processors::AudioSink;
    use crate::turn_detection::{AlwaysComplete, EnergyVad, TurnCoordinatorConfig};

    /// Context for driving one stage by hand: (ctx, downstream, loopback, gate)
    pub fn context(
        name: &'static str,
    ) -> (
        ProcessorContext,
        mpsc::Receiver<Frame>,
        mpsc::Receiver<Frame>,
        CancelGate,
    ) {
        let gate = CancelGate::new();
        let (tx, rx) = mpsc::channel(256);
        let (loop_tx, loop_rx) = mpsc::channel(256);
        let (err_tx, _err_rx) = mpsc::unbounded_channel();
        let ctx = ProcessorContext::new(
            "CA-test",
            name,
            FrameSink::new(tx, gate.clone()),
            FrameSink::new(loop_tx, gate.clone()),
            err_tx,
        );
        (ctx, rx, loop_rx, gate)
    }

    pub async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame within 1s")
            .expect("channel open")
    }

    pub fn user_params() -> (UserAggregatorParams, watch::Sender<bool>) {
        let (bot_tx, bot_rx) = watch::channel(false);
        let params = UserAggregatorParams {
            vad: Box::new(EnergyVad::default()),
            analyzer: Arc::new(AlwaysComplete),
            turn: TurnCoordinatorConfig::default(),
            bot_speaking: bot_rx,
        };
        (params, bot_tx)
    }

    /// Forwards everything and remembers what it saw
    pub struct Passthrough {
        name: &'static str,
        role: StageRole,
        seen: Mutex<Vec<Frame>>,
    }

    impl Passthrough {
        pub fn new(name: &'static str, role: StageRole) -> Self {
            Self {
                name,
                role,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn seen(&self) -> Vec<Frame> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl FrameProcessor for Passthrough {
        async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
            if frame.is_end_of_session() {
                return Ok(());
            }
            self.seen.lock().push(frame.clone());
            ctx.push(frame).await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn role(&self) -> StageRole {
            self.role
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        sent: AtomicUsize,
        clears: AtomicUsize,
        closed: AtomicBool,
    }

    impl RecordingSink {
        pub fn frames_sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }

        pub fn clears(&self) -> usize {
            self.clears.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn send_audio(&self, _frame: &AudioFrame) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Emits each scripted text as a final transcript after its frame count
    pub struct ScriptedStt {
        script: Vec<(String, usize)>,
    }

    impl ScriptedStt {
        pub fn new(script: Vec<(&str, usize)>) -> Self {
            Self {
                script: script.into_iter().map(|(t, n)| (t.to_string(), n)).collect(),
            }
        }
    }

    impl SpeechToText for ScriptedStt {
        fn transcribe_stream<'a>(&'a self, mut audio: AudioStream<'a>) -> TranscriptStream<'a> {
            use futures::StreamExt;

            Box::pin(async_stream::stream! {
                let mut script = self.script.iter();
                let mut next = script.next();
                let mut frames = 0;
                while audio.next().await.is_some() {
                    frames += 1;
                    if let Some((text, after)) = next {
                        if frames >= *after {
                            yield Ok::<_, voice_bridge_core::Error>(TranscriptResult::final_text(text.clone(), 0.9));
                            frames = 0;
                            next = script.next();
                        }
                    }
                }
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Streams fixed fragments, optionally pausing before each
    pub struct ScriptedLlm {
        fragments: Vec<String>,
        delay: Duration,
        last_messages: Mutex<Vec<TranscriptEntry>>,
    }

    impl ScriptedLlm {
        pub fn new(fragments: Vec<&str>) -> Self {
            Self {
                fragments: fragments.into_iter().map(String::from).collect(),
                delay: Duration::ZERO,
                last_messages: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn last_messages(&self) -> Vec<TranscriptEntry> {
            self.last_messages.lock().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate_stream(
            &self,
            messages: &[TranscriptEntry],
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationStats> {
            *self.last_messages.lock() = messages.to_vec();
            let mut stats = GenerationStats::default();
            for fragment in &self.fragments {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if tx.send(fragment.clone()).await.is_err() {
                    break;
                }
                stats.text.push_str(fragment);
                stats.tokens += 1;
            }
            Ok(stats)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Produces a fixed number of 20ms frames per text
    pub struct ScriptedTts {
        frames_per_text: usize,
        frame_delay: Duration,
        spoken: Mutex<Vec<String>>,
    }

    impl ScriptedTts {
        pub fn new(frames_per_text: usize) -> Self {
            Self {
                frames_per_text,
                frame_delay: Duration::ZERO,
                spoken: Mutex::new(Vec::new()),
            }
        }

        pub fn with_frame_delay(mut self, delay: Duration) -> Self {
            self.frame_delay = delay;
            self
        }

        pub fn spoken(&self) -> Vec<String> {
            self.spoken.lock().clone()
        }
    }

    impl TextToSpeech for ScriptedTts {
        fn synthesize_stream<'a>(&'a self, text: &'a str) -> SynthesisStream<'a> {
            self.spoken.lock().push(text.to_string());
            Box::pin(async_stream::stream! {
                for seq in 0..self.frames_per_text {
                    if !self.frame_delay.is_zero() {
                        tokio::time::sleep(self.frame_delay).await;
                    }
                    yield Ok::<_, voice_bridge_core::Error>(AudioFrame::new(
                        vec![0.1; 160],
                        SampleRate::Hz8000,
                        seq as u64,
                    ));
                }
            })
        }

        fn output_sample_rate(&self) -> SampleRate {
            SampleRate::Hz8000
        }

        fn voice_name(&self) -> &str {
            "scripted"
        }
    }
}
