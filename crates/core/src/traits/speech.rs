//! Speech processing traits

use futures::Stream;
use std::pin::Pin;

use crate::{AudioFrame, Result, SampleRate, TranscriptResult};

/// Stream of caller audio handed to a speech-to-text provider
pub type AudioStream<'a> = Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>;

/// Stream of transcription results
pub type TranscriptStream<'a> = Pin<Box<dyn Stream<Item = Result<TranscriptResult>> + Send + 'a>>;

/// Stream of synthesized audio for one piece of text
pub type SynthesisStream<'a> = Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send + 'a>>;

/// Speech-to-Text interface
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn SpeechToText> = Arc::new(HttpStt::new(config)?);
/// let mut results = stt.transcribe_stream(Box::pin(ReceiverStream::new(audio_rx)));
/// while let Some(result) = results.next().await {
///     println!("Transcribed: {}", result?.text);
/// }
/// ```
pub trait SpeechToText: Send + Sync + 'static {
    /// Stream transcription as audio arrives
    ///
    /// Partial results have `is_final = false`. The stream ends when the
    /// audio stream ends; dropping it must release the provider connection.
    fn transcribe_stream<'a>(&'a self, audio: AudioStream<'a>) -> TranscriptStream<'a>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech interface
///
/// The returned stream ending is the provider's "turn complete" signal.
/// Dropping the stream mid-way cancels synthesis.
pub trait TextToSpeech: Send + Sync + 'static {
    /// Stream synthesized audio for `text`
    fn synthesize_stream<'a>(&'a self, text: &'a str) -> SynthesisStream<'a>;

    /// Sample rate of produced frames
    fn output_sample_rate(&self) -> SampleRate;

    /// Voice identifier for logging
    fn voice_name(&self) -> &str;
}
