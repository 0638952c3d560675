//! Centralized constants for the voice bridge
//!
//! Single source of truth for default values used across crates.

/// Provider endpoints
pub mod endpoints {
    /// OpenAI API endpoint
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

    /// Deepgram API endpoint
    pub const DEEPGRAM_DEFAULT: &str = "https://api.deepgram.com";

    /// ElevenLabs API endpoint
    pub const ELEVENLABS_DEFAULT: &str = "https://api.elevenlabs.io";
}

/// Provider defaults
pub mod providers {
    pub const LLM_MODEL: &str = "gpt-4o";
    pub const STT_MODEL: &str = "nova-2";
    /// British reading voice
    pub const TTS_VOICE_ID: &str = "Xb7hH8MSUJpSbSDYk0k2";
    pub const TTS_MODEL: &str = "eleven_turbo_v2_5";
    pub const LANGUAGE: &str = "en";
}

/// Audio defaults
pub mod audio {
    /// Telephony narrowband rate for both directions
    pub const INPUT_SAMPLE_RATE: u32 = 8000;
    pub const OUTPUT_SAMPLE_RATE: u32 = 8000;
    /// Rates accepted by the audio section
    pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000, 22050, 24000, 44100, 48000];
}

/// Turn detection defaults
pub mod turn {
    /// Energy threshold separating voiced from unvoiced frames (dBFS)
    pub const VAD_THRESHOLD_DB: f32 = -40.0;
    /// Voiced audio needed before speech is reported
    pub const VAD_START_SECS: f32 = 0.2;
    /// Silence needed before a pause is reported
    pub const VAD_STOP_SECS: f32 = 0.2;
    /// Fallback window for semantic confirmation
    pub const SEMANTIC_TIMEOUT_MS: u64 = 1500;

    pub const STOP_SECS_MIN: f32 = 0.05;
    pub const STOP_SECS_MAX: f32 = 2.0;
    pub const SEMANTIC_TIMEOUT_MIN_MS: u64 = 200;
    pub const SEMANTIC_TIMEOUT_MAX_MS: u64 = 10_000;
}

/// Pipeline runtime defaults
pub mod pipeline {
    /// Capacity of each inter-stage channel
    pub const CHANNEL_CAPACITY: usize = 256;
    /// Upper bound on a single stage's stop during cancellation
    pub const STOP_TIMEOUT_MS: u64 = 2000;
}

/// Timeouts
pub mod timeouts {
    /// LLM request timeout (ms)
    pub const LLM_REQUEST_MS: u64 = 60_000;

    /// STT request timeout (ms)
    pub const STT_TIMEOUT_MS: u64 = 10_000;

    /// TTS synthesis timeout (ms)
    pub const TTS_TIMEOUT_MS: u64 = 15_000;
}

/// Persona defaults
pub mod persona {
    pub const SYSTEM_PROMPT: &str = "You are a helpful LLM in an audio call. Your goal is to \
demonstrate your capabilities in a succinct way. Your output will be converted to audio so \
don't include special characters in your answers. Respond to what the user said in a creative \
and helpful way.";

    pub const GREETING_INSTRUCTION: &str = "Please introduce yourself to the user.";
}
