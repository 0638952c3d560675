//! Core traits and types for the voice bridge
//!
//! This crate provides foundational types used across all other crates:
//! - Frame and stage traits for the processing pipeline
//! - Provider traits (STT, TTS, LLM)
//! - Audio frame types and the telephony mu-law codec
//! - Transcript value types
//! - Error taxonomy

pub mod audio;
pub mod error;
pub mod traits;
pub mod transcript;

pub use audio::{linear_to_mulaw, mulaw_to_linear, AudioEncoding, AudioFrame, SampleRate};
pub use error::{Error, HandshakeError, Result, StageError, TeardownError};
pub use transcript::{Role, TranscriptEntry, TranscriptResult};

pub use traits::{
    // Speech
    AudioStream, SpeechToText, SynthesisStream, TextToSpeech, TranscriptStream,
    // LLM
    GenerationStats, LanguageModel,
    // Pipeline
    CancelGate, ControlSignal, Frame, FrameProcessor, FrameSink, InterruptSignal, ProcessorContext,
    StageRole, TurnCheckOutcome,
};
