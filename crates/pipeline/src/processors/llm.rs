//! Language model stage
//!
//! Starts a response whenever a sealed user utterance or a run-conversation
//! signal arrives. Generation runs in its own task so interruptions can
//! cancel it while the stage keeps receiving frames. A raised barge-in stops
//! generation right away, before the `Interruption` frame reaches this stage.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_bridge_core::{
    ControlSignal, Frame, FrameProcessor, LanguageModel, ProcessorContext, Result,
    TranscriptEntry,
};

use crate::aggregators::TranscriptReader;

const FRAGMENT_BUFFER: usize = 64;

/// Language model stage
pub struct LlmProcessor {
    llm: Arc<dyn LanguageModel>,
    transcript: TranscriptReader,
    inflight: Mutex<Option<JoinHandle<()>>>,
}

impl LlmProcessor {
    pub fn new(llm: Arc<dyn LanguageModel>, transcript: TranscriptReader) -> Self {
        Self {
            llm,
            transcript,
            inflight: Mutex::new(None),
        }
    }

    /// Abort the in-flight response and wait until its task is gone
    async fn cancel_inflight(&self) -> bool {
        let handle = self.inflight.lock().take();
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                let _ = handle.await;
                true
            }
            _ => false,
        }
    }

    async fn start_response(&self, ctx: &ProcessorContext) -> Result<()> {
        if self.cancel_inflight().await {
            // Downstream stages and the transcript must drop the old response too
            tracing::debug!(session_id = %ctx.session_id, "Superseded in-flight response");
            ctx.push_interruption().await?;
        }

        let messages = self.transcript.snapshot();
        let llm = Arc::clone(&self.llm);
        let ctx = ctx.clone();
        let seen = ctx.interrupts().raised();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = ctx.interrupts().raised_beyond(seen) => {
                    tracing::debug!(session_id = %ctx.session_id, "Generation stopped by barge-in");
                }
                _ = respond(llm, messages, &ctx) => {}
            }
        });

        *self.inflight.lock() = Some(handle);
        Ok(())
    }
}

async fn respond(
    llm: Arc<dyn LanguageModel>,
    messages: Vec<TranscriptEntry>,
    ctx: &ProcessorContext,
) {
    if ctx
        .push(Frame::Control(ControlSignal::LlmResponseStart))
        .await
        .is_err()
    {
        return;
    }

    let (tx, mut rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
    let forward = async {
        while let Some(text) = rx.recv().await {
            if ctx.push(Frame::GeneratedText { text }).await.is_err() {
                break;
            }
        }
    };
    let (result, _) = tokio::join!(llm.generate_stream(&messages, tx), forward);

    match result {
        Ok(stats) => {
            tracing::info!(
                session_id = %ctx.session_id,
                model = llm.model_name(),
                tokens = stats.tokens,
                ttft_ms = stats.time_to_first_token_ms,
                total_ms = stats.total_time_ms,
                "Response generated"
            );
            if let Err(e) = ctx.push(Frame::Control(ControlSignal::LlmResponseEnd)).await {
                tracing::trace!(session_id = %ctx.session_id, error = %e, "Response end not forwarded");
            }
        }
        Err(_) if ctx.is_cancelled() => {}
        Err(e) => ctx.report_error(e),
    }
}

#[async_trait]
impl FrameProcessor for LlmProcessor {
    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        match frame {
            Frame::TranscribedText { is_final: true, .. }
            | Frame::Control(ControlSignal::RunConversation) => self.start_response(ctx).await,
            // Unsealed user text never reaches synthesis
            Frame::TranscribedText { .. } => Ok(()),
            Frame::Control(ControlSignal::Interruption) => {
                self.cancel_inflight().await;
                ctx.push(frame).await
            }
            Frame::Control(ControlSignal::EndOfSession) => {
                // Let the current response finish before the session drains
                let handle = self.inflight.lock().take();
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                Ok(())
            }
            other => ctx.push(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }

    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        if let Some(handle) = self.inflight.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}
