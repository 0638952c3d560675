//! Core traits for the voice bridge
//!
//! All stages and providers implement these traits to enable:
//! - Pluggable providers (swap implementations without code changes)
//! - Testing with scripted providers
//!
//! # Trait Hierarchy
//!
//! ```text
//! Speech Processing:
//!   - SpeechToText: Audio stream → transcript stream
//!   - TextToSpeech: Text → audio stream
//!
//! Language Models:
//!   - LanguageModel: Streaming response generation
//!
//! Pipeline:
//!   - FrameProcessor: Process frames in the pipeline
//! ```

mod llm;
mod pipeline;
mod speech;

pub use llm::{GenerationStats, LanguageModel};
pub use pipeline::{
    CancelGate, ControlSignal, Frame, FrameProcessor, FrameSink, InterruptSignal, ProcessorContext,
    StageRole, TurnCheckOutcome,
};
pub use speech::{AudioStream, SpeechToText, SynthesisStream, TextToSpeech, TranscriptStream};
