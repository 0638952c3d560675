//! Language Model traits

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Result, TranscriptEntry};

/// Statistics of one completed generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    /// Full generated text
    pub text: String,
    /// Number of streamed fragments
    pub tokens: usize,
    /// Time to first token (ms)
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
}

/// Language Model interface
///
/// # Example
///
/// ```ignore
/// let (tx, mut rx) = mpsc::channel(64);
/// let stats = llm.generate_stream(&transcript, tx).await?;
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Stream a response to `messages`, sending fragments on `tx`
    ///
    /// Returning is the "turn complete" signal. Cancelling the future must
    /// drop the underlying provider request.
    async fn generate_stream(
        &self,
        messages: &[TranscriptEntry],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationStats>;

    /// Get model name
    fn model_name(&self) -> &str;
}
