//! Text-to-speech stage
//!
//! Generated text is split into sentences and synthesized by a worker task,
//! one sentence at a time. Text and control frames travel through the same
//! worker queue so they stay ordered with the audio produced before them.
//!
//! A barge-in must not wait behind a full worker queue. While an interruption
//! is raised but not yet received, queued work is dropped along with any
//! response frames still arriving from the language stage.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_bridge_core::{
    ControlSignal, Frame, FrameProcessor, ProcessorContext, Result, TextToSpeech,
};

use super::sentence::{SentenceSplitter, SentenceSplitterConfig};
use super::InterruptCursor;

const JOB_QUEUE: usize = 64;

enum TtsJob {
    Speak(String),
    Passthrough(Frame),
}

#[derive(Default)]
struct Worker {
    tx: Option<mpsc::Sender<TtsJob>>,
    handle: Option<JoinHandle<()>>,
}

/// Text-to-speech stage
pub struct TtsProcessor {
    tts: Arc<dyn TextToSpeech>,
    splitter: Mutex<SentenceSplitter>,
    worker: Mutex<Worker>,
    interrupts: InterruptCursor,
}

impl TtsProcessor {
    pub fn new(tts: Arc<dyn TextToSpeech>) -> Self {
        Self::with_splitter(tts, SentenceSplitterConfig::default())
    }

    pub fn with_splitter(tts: Arc<dyn TextToSpeech>, config: SentenceSplitterConfig) -> Self {
        Self {
            tts,
            splitter: Mutex::new(SentenceSplitter::new(config)),
            worker: Mutex::new(Worker::default()),
            interrupts: InterruptCursor::default(),
        }
    }

    /// Job sender, spawning the worker on first use
    fn sender(&self, ctx: &ProcessorContext) -> mpsc::Sender<TtsJob> {
        let mut worker = self.worker.lock();
        if let Some(tx) = &worker.tx {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(JOB_QUEUE);
        worker.handle = Some(tokio::spawn(run_worker(
            Arc::clone(&self.tts),
            rx,
            ctx.clone(),
        )));
        worker.tx = Some(tx.clone());
        tx
    }

    /// Queue a job, giving up if a barge-in is raised while the queue is full
    async fn enqueue(&self, job: TtsJob, ctx: &ProcessorContext) -> Result<()> {
        let tx = self.sender(ctx);
        let seen = self.interrupts.seen();

        tokio::select! {
            biased;
            _ = ctx.interrupts().raised_beyond(seen) => {
                tracing::debug!(session_id = %ctx.session_id, "Barge-in while synthesis was backed up");
                self.drop_pending().await;
                Ok(())
            }
            sent = tx.send(job) => sent.map_err(|_| voice_bridge_core::Error::ChannelClosed),
        }
    }

    async fn drop_pending(&self) {
        self.discard_worker().await;
        self.splitter.lock().reset();
    }

    /// Drop queued work and any synthesis in progress
    async fn discard_worker(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            worker.tx = None;
            worker.handle.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    tts: Arc<dyn TextToSpeech>,
    mut rx: mpsc::Receiver<TtsJob>,
    ctx: ProcessorContext,
) {
    let mut speaking = false;

    while let Some(job) = rx.recv().await {
        match job {
            TtsJob::Speak(text) => {
                let mut audio = tts.synthesize_stream(&text);
                while let Some(result) = audio.next().await {
                    match result {
                        Ok(frame) => {
                            if !speaking {
                                speaking = true;
                                if ctx
                                    .push(Frame::Control(ControlSignal::TtsStarted))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            if ctx.push(Frame::SynthesizedAudio(frame)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            if !ctx.is_cancelled() {
                                ctx.report_error(e);
                            }
                            return;
                        }
                    }
                }
            }
            TtsJob::Passthrough(frame) => {
                if speaking && matches!(frame, Frame::Control(ControlSignal::LlmResponseEnd)) {
                    speaking = false;
                    if ctx
                        .push(Frame::Control(ControlSignal::TtsStopped))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                if ctx.push(frame).await.is_err() {
                    return;
                }
            }
        }
    }

    if speaking {
        if let Err(e) = ctx.push(Frame::Control(ControlSignal::TtsStopped)).await {
            tracing::trace!(session_id = %ctx.session_id, error = %e, "TtsStopped not forwarded");
        }
    }
}

#[async_trait]
impl FrameProcessor for TtsProcessor {
    async fn on_start(&self, ctx: &ProcessorContext) -> Result<()> {
        self.sender(ctx);
        tracing::debug!(voice = self.tts.voice_name(), "TTS worker started");
        Ok(())
    }

    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        if self.interrupts.is_stale(ctx) {
            self.drop_pending().await;
            match frame {
                Frame::GeneratedText { .. }
                | Frame::Control(ControlSignal::LlmResponseStart)
                | Frame::Control(ControlSignal::LlmResponseEnd) => return Ok(()),
                Frame::Control(ControlSignal::Interruption)
                | Frame::Control(ControlSignal::EndOfSession) => {}
                other => return ctx.push(other).await,
            }
        }

        match frame {
            Frame::GeneratedText { ref text } => {
                let sentences = self.splitter.lock().push(text);
                for sentence in sentences {
                    self.enqueue(TtsJob::Speak(sentence), ctx).await?;
                }
                self.enqueue(TtsJob::Passthrough(frame), ctx).await
            }
            Frame::Control(ControlSignal::LlmResponseStart) => {
                self.splitter.lock().reset();
                self.enqueue(TtsJob::Passthrough(frame), ctx).await
            }
            Frame::Control(ControlSignal::LlmResponseEnd) => {
                let rest = self.splitter.lock().flush();
                if let Some(rest) = rest {
                    self.enqueue(TtsJob::Speak(rest), ctx).await?;
                }
                self.enqueue(TtsJob::Passthrough(frame), ctx).await
            }
            Frame::Control(ControlSignal::Interruption) => {
                self.interrupts.advance(ctx);
                self.drop_pending().await;
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::EndOfSession) => {
                let rest = self.splitter.lock().flush();
                if let Some(rest) = rest {
                    self.enqueue(TtsJob::Speak(rest), ctx).await?;
                }
                let handle = {
                    let mut worker = self.worker.lock();
                    worker.tx = None;
                    worker.handle.take()
                };
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                Ok(())
            }
            other => self.enqueue(TtsJob::Passthrough(other), ctx).await,
        }
    }

    fn name(&self) -> &'static str {
        "tts"
    }

    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        let mut worker = self.worker.lock();
        worker.tx = None;
        if let Some(handle) = worker.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, recv_frame, ScriptedTts};
    use std::time::Duration;

    fn kinds(frames: &[Frame]) -> Vec<&'static str> {
        frames.iter().map(|f| f.kind()).collect()
    }

    async fn collect_until_end(out: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = recv_frame(out).await;
            let done = matches!(frame, Frame::Control(ControlSignal::LlmResponseEnd));
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    #[tokio::test]
    async fn test_response_is_bracketed_by_tts_signals() {
        let tts = Arc::new(ScriptedTts::new(2));
        let stage = TtsProcessor::new(tts.clone());
        let (ctx, mut out, _loopback, _gate) = context("tts");

        for frame in [
            Frame::Control(ControlSignal::LlmResponseStart),
            Frame::GeneratedText { text: "Hi there. ".into() },
            Frame::GeneratedText { text: "How can I help?".into() },
            Frame::Control(ControlSignal::LlmResponseEnd),
        ] {
            stage.process(frame, &ctx).await.unwrap();
        }

        let frames = collect_until_end(&mut out).await;
        let kinds = kinds(&frames);
        let started = kinds.iter().position(|k| *k == "tts_started").unwrap();
        let stopped = kinds.iter().position(|k| *k == "tts_stopped").unwrap();
        let first_audio = kinds.iter().position(|k| *k == "synthesized_audio").unwrap();
        assert!(started < first_audio);
        assert!(stopped > first_audio);
        assert_eq!(stopped, kinds.len() - 2);
        assert_eq!(kinds.iter().filter(|k| **k == "synthesized_audio").count(), 4);
        assert_eq!(kinds.iter().filter(|k| **k == "generated_text").count(), 2);
        // The unterminated tail is spoken on response end
        assert_eq!(tts.spoken(), vec!["Hi there.", "How can I help?"]);
    }

    #[tokio::test]
    async fn test_interruption_discards_pending_speech() {
        let tts = Arc::new(ScriptedTts::new(50).with_frame_delay(Duration::from_millis(20)));
        let stage = TtsProcessor::new(tts);
        let (ctx, mut out, _loopback, _gate) = context("tts");

        stage
            .process(Frame::Control(ControlSignal::LlmResponseStart), &ctx)
            .await
            .unwrap();
        stage
            .process(Frame::GeneratedText { text: "This is long. ".into() }, &ctx)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        stage
            .process(Frame::Control(ControlSignal::Interruption), &ctx)
            .await
            .unwrap();

        loop {
            if matches!(
                recv_frame(&mut out).await,
                Frame::Control(ControlSignal::Interruption)
            ) {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(out.try_recv().is_err(), "no audio after the interruption");
    }

    #[tokio::test]
    async fn test_end_of_session_flushes_buffered_text() {
        let tts = Arc::new(ScriptedTts::new(1));
        let stage = TtsProcessor::new(tts.clone());
        let (ctx, mut out, _loopback, _gate) = context("tts");

        stage
            .process(Frame::GeneratedText { text: "Goodbye".into() }, &ctx)
            .await
            .unwrap();
        stage
            .process(Frame::Control(ControlSignal::EndOfSession), &ctx)
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = out.try_recv() {
            frames.push(frame);
        }
        assert_eq!(
            kinds(&frames),
            vec!["generated_text", "tts_started", "synthesized_audio", "tts_stopped"]
        );
        assert_eq!(tts.spoken(), vec!["Goodbye"]);
    }

    #[tokio::test]
    async fn test_raised_interruption_unblocks_full_queue() {
        let tts = Arc::new(ScriptedTts::new(25).with_frame_delay(Duration::from_millis(20)));
        let stage = Arc::new(TtsProcessor::new(tts.clone()));
        let (ctx, mut out, _loopback, _gate) = context("tts");

        // Far more sentences than the worker queue holds
        let feeder = tokio::spawn({
            let stage = Arc::clone(&stage);
            let ctx = ctx.clone();
            async move {
                stage
                    .process(Frame::Control(ControlSignal::LlmResponseStart), &ctx)
                    .await?;
                for n in 0..200 {
                    let text = format!("Sentence {}. ", n);
                    stage.process(Frame::GeneratedText { text }, &ctx).await?;
                }
                stage
                    .process(Frame::Control(ControlSignal::LlmResponseEnd), &ctx)
                    .await
            }
        });
        let drain = tokio::spawn(async move {
            while out.recv().await.is_some() {}
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!feeder.is_finished(), "queue is backed up");

        ctx.interrupts().raise();
        tokio::time::timeout(Duration::from_millis(500), feeder)
            .await
            .expect("feeder released by the barge-in")
            .unwrap()
            .unwrap();
        let spoken = tts.spoken().len();
        assert!(spoken < 10, "stale sentences were not synthesized: {}", spoken);

        // The in-band frame ends the stale window
        stage
            .process(Frame::Control(ControlSignal::Interruption), &ctx)
            .await
            .unwrap();
        assert!(!stage.interrupts.is_stale(&ctx));
        drain.abort();
    }
}
