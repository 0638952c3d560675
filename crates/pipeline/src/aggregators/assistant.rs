//! Assistant context aggregator
//!
//! Collects generated text as it streams past the audio output and appends
//! one assistant entry per response. An interrupted response is sealed with
//! whatever text had been generated before the interruption.

use async_trait::async_trait;
use parking_lot::Mutex;
use voice_bridge_core::{
    ControlSignal, Frame, FrameProcessor, ProcessorContext, Result, StageRole, TranscriptEntry,
};

use super::transcript::TranscriptWriter;

/// Assistant context aggregator
pub struct AssistantContextAggregator {
    writer: TranscriptWriter,
    buffer: Mutex<String>,
}

impl AssistantContextAggregator {
    pub(crate) fn new(writer: TranscriptWriter) -> Self {
        Self {
            writer,
            buffer: Mutex::new(String::new()),
        }
    }

    /// Seal buffered text, if any
    fn seal(&self, interrupted: bool) -> Option<usize> {
        let text = std::mem::take(&mut *self.buffer.lock());
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        tracing::debug!(interrupted, chars = text.len(), "Assistant turn sealed");
        Some(self.writer.append(TranscriptEntry::assistant(text)))
    }
}

#[async_trait]
impl FrameProcessor for AssistantContextAggregator {
    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        match &frame {
            Frame::GeneratedText { text } => self.buffer.lock().push_str(text),
            Frame::Control(ControlSignal::LlmResponseStart) => self.buffer.lock().clear(),
            Frame::Control(ControlSignal::LlmResponseEnd) => {
                self.seal(false);
            }
            Frame::Control(ControlSignal::Interruption) => {
                self.seal(true);
            }
            Frame::Control(ControlSignal::EndOfSession) => return Ok(()),
            _ => {}
        }
        ctx.push(frame).await
    }

    fn name(&self) -> &'static str {
        "assistant_aggregator"
    }

    fn role(&self) -> StageRole {
        StageRole::ContextSink
    }
}
