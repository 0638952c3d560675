//! Configuration management for the voice bridge
//!
//! Supports loading configuration from:
//! - YAML/TOML/JSON files under `config/`
//! - Environment variables (VOICE_BRIDGE_ prefix, `__` separator)
//! - Provider credential fallbacks (OPENAI_API_KEY, DEEPGRAM_API_KEY, ELEVENLABS_API_KEY)

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, AudioConfig, LlmProviderConfig, ObservabilityConfig,
    PersonaConfig, PipelineConfig, ProvidersConfig, ServerConfig, Settings, SttProviderConfig,
    TtsProviderConfig, TurnConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voice_bridge_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_bridge_core::Error::Config(err.to_string())
    }
}
