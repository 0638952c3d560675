//! Pipeline stages
//!
//! - [`TransportInput`] / [`TransportOutput`]: the audio edges
//! - [`SttProcessor`]: caller audio to transcripts
//! - [`LlmProcessor`]: transcript to generated text
//! - [`TtsProcessor`]: generated text to assistant audio

mod llm;
mod sentence;
mod stt;
mod transport;
mod tts;

pub use llm::LlmProcessor;
pub use sentence::{SentenceSplitter, SentenceSplitterConfig};
pub use stt::SttProcessor;
pub use transport::{AudioSink, TransportInput, TransportOutput};
pub use tts::TtsProcessor;

use std::sync::atomic::{AtomicU64, Ordering};
use voice_bridge_core::ProcessorContext;

/// Interruptions a stage has already seen in-band
#[derive(Debug, Default)]
pub(crate) struct InterruptCursor(AtomicU64);

impl InterruptCursor {
    pub(crate) fn seen(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// A barge-in was raised but its `Interruption` frame has not arrived yet
    pub(crate) fn is_stale(&self, ctx: &ProcessorContext) -> bool {
        ctx.interrupts().raised() > self.seen()
    }

    /// Record an in-band `Interruption`, never counting past what was raised
    pub(crate) fn advance(&self, ctx: &ProcessorContext) {
        let next = (self.seen() + 1).min(ctx.interrupts().raised());
        self.0.store(next, Ordering::SeqCst);
    }
}
