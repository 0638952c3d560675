//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{audio, endpoints, persona, pipeline, providers, timeouts, turn};
use crate::ConfigError;

/// Main application settings
///
/// Read once at startup and shared read-only across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio negotiation
    #[serde(default)]
    pub audio: AudioConfig,

    /// Turn detection
    #[serde(default)]
    pub turn: TurnConfig,

    /// Pipeline runtime
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Assistant persona
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Provider endpoints and credentials
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_audio()?;
        self.validate_turn()?;
        self.validate_pipeline()?;
        self.validate_persona()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "Must allow at least one session".to_string(),
            });
        }

        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("audio.input_sample_rate", self.audio.input_sample_rate),
            ("audio.output_sample_rate", self.audio.output_sample_rate),
        ] {
            if !audio::SUPPORTED_SAMPLE_RATES.contains(&rate) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!(
                        "Unsupported sample rate {}, expected one of {:?}",
                        rate,
                        audio::SUPPORTED_SAMPLE_RATES
                    ),
                });
            }
        }
        Ok(())
    }

    fn validate_turn(&self) -> Result<(), ConfigError> {
        let t = &self.turn;

        if !(turn::STOP_SECS_MIN..=turn::STOP_SECS_MAX).contains(&t.stop_secs) {
            return Err(ConfigError::InvalidValue {
                field: "turn.stop_secs".to_string(),
                message: format!(
                    "Must be between {} and {}, got {}",
                    turn::STOP_SECS_MIN,
                    turn::STOP_SECS_MAX,
                    t.stop_secs
                ),
            });
        }

        if t.start_secs < 0.0 || t.start_secs > turn::STOP_SECS_MAX {
            return Err(ConfigError::InvalidValue {
                field: "turn.start_secs".to_string(),
                message: format!("Must be between 0 and {}, got {}", turn::STOP_SECS_MAX, t.start_secs),
            });
        }

        if t.vad_threshold_db > 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "turn.vad_threshold_db".to_string(),
                message: format!("Must be a dBFS value (<= 0), got {}", t.vad_threshold_db),
            });
        }

        if !(turn::SEMANTIC_TIMEOUT_MIN_MS..=turn::SEMANTIC_TIMEOUT_MAX_MS)
            .contains(&t.semantic_timeout_ms)
        {
            return Err(ConfigError::InvalidValue {
                field: "turn.semantic_timeout_ms".to_string(),
                message: format!(
                    "Must be between {} and {} ms, got {}",
                    turn::SEMANTIC_TIMEOUT_MIN_MS,
                    turn::SEMANTIC_TIMEOUT_MAX_MS,
                    t.semantic_timeout_ms
                ),
            });
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.channel_capacity".to_string(),
                message: "Channel capacity must be positive".to_string(),
            });
        }

        if self.pipeline.stop_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.stop_timeout_ms".to_string(),
                message: "Stop timeout must be positive".to_string(),
            });
        }

        Ok(())
    }

    fn validate_persona(&self) -> Result<(), ConfigError> {
        if self.persona.system_prompt.trim().is_empty() {
            return Err(ConfigError::MissingField("persona.system_prompt".to_string()));
        }
        Ok(())
    }

    /// Fill missing provider credentials from the conventional variables
    pub fn apply_credential_fallbacks(&mut self) {
        fill_from_env(&mut self.providers.llm.api_key, "OPENAI_API_KEY");
        fill_from_env(&mut self.providers.stt.api_key, "DEEPGRAM_API_KEY");
        fill_from_env(&mut self.providers.tts.api_key, "ELEVENLABS_API_KEY");
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    *slot = fallback_value(slot.take(), std::env::var(var).ok());
}

/// Prefer an explicitly configured value; ignore empty strings from either side
fn fallback_value(configured: Option<String>, fallback: Option<String>) -> Option<String> {
    configured
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.filter(|v| !v.is_empty()))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_sessions() -> usize {
    100
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_sessions: default_max_sessions(),
            cors_enabled: true,
        }
    }
}

/// Audio configuration, negotiated once per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_input_rate")]
    pub input_sample_rate: u32,

    #[serde(default = "default_output_rate")]
    pub output_sample_rate: u32,
}

fn default_input_rate() -> u32 {
    audio::INPUT_SAMPLE_RATE
}
fn default_output_rate() -> u32 {
    audio::OUTPUT_SAMPLE_RATE
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_rate(),
            output_sample_rate: default_output_rate(),
        }
    }
}

/// Turn detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Energy threshold for voiced frames (dBFS)
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold_db: f32,

    /// Voiced duration before speech starts (seconds)
    #[serde(default = "default_start_secs")]
    pub start_secs: f32,

    /// Silence duration before a pause is reported (seconds)
    #[serde(default = "default_stop_secs")]
    pub stop_secs: f32,

    /// Use the semantic analyzer; otherwise every pause ends the turn
    #[serde(default = "default_true")]
    pub semantic_enabled: bool,

    /// Fallback window for semantic confirmation (ms)
    #[serde(default = "default_semantic_timeout")]
    pub semantic_timeout_ms: u64,
}

fn default_vad_threshold() -> f32 {
    turn::VAD_THRESHOLD_DB
}
fn default_start_secs() -> f32 {
    turn::VAD_START_SECS
}
fn default_stop_secs() -> f32 {
    turn::VAD_STOP_SECS
}
fn default_semantic_timeout() -> u64 {
    turn::SEMANTIC_TIMEOUT_MS
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            vad_threshold_db: default_vad_threshold(),
            start_secs: default_start_secs(),
            stop_secs: default_stop_secs(),
            semantic_enabled: true,
            semantic_timeout_ms: default_semantic_timeout(),
        }
    }
}

/// Pipeline runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each inter-stage channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Per-stage stop timeout during cancellation (ms)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Whether user speech cancels an in-flight assistant response
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,
}

fn default_channel_capacity() -> usize {
    pipeline::CHANNEL_CAPACITY
}
fn default_stop_timeout() -> u64 {
    pipeline::STOP_TIMEOUT_MS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            stop_timeout_ms: default_stop_timeout(),
            allow_interruptions: true,
        }
    }
}

/// Assistant persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Seeded system entry
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// System entry appended when the caller connects
    #[serde(default = "default_greeting")]
    pub greeting_instruction: String,
}

fn default_system_prompt() -> String {
    persona::SYSTEM_PROMPT.to_string()
}
fn default_greeting() -> String {
    persona::GREETING_INSTRUCTION.to_string()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting_instruction: default_greeting(),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub llm: LlmProviderConfig,

    #[serde(default)]
    pub stt: SttProviderConfig,

    #[serde(default)]
    pub tts: TtsProviderConfig,
}

/// Language model provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

fn default_openai_endpoint() -> String {
    endpoints::OPENAI_DEFAULT.to_string()
}
fn default_llm_model() -> String {
    providers::LLM_MODEL.to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_llm_timeout() -> u64 {
    timeouts::LLM_REQUEST_MS
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_openai_endpoint(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout(),
        }
    }
}

/// Speech-to-text provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    #[serde(default = "default_deepgram_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_stt_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_stt_timeout")]
    pub timeout_ms: u64,
}

fn default_deepgram_endpoint() -> String {
    endpoints::DEEPGRAM_DEFAULT.to_string()
}
fn default_stt_model() -> String {
    providers::STT_MODEL.to_string()
}
fn default_language() -> String {
    providers::LANGUAGE.to_string()
}
fn default_stt_timeout() -> u64 {
    timeouts::STT_TIMEOUT_MS
}

impl Default for SttProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_deepgram_endpoint(),
            model: default_stt_model(),
            language: default_language(),
            api_key: None,
            timeout_ms: default_stt_timeout(),
        }
    }
}

/// Speech synthesis provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default = "default_elevenlabs_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_tts_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_timeout")]
    pub timeout_ms: u64,
}

fn default_elevenlabs_endpoint() -> String {
    endpoints::ELEVENLABS_DEFAULT.to_string()
}
fn default_voice_id() -> String {
    providers::TTS_VOICE_ID.to_string()
}
fn default_tts_model() -> String {
    providers::TTS_MODEL.to_string()
}
fn default_tts_timeout() -> u64 {
    timeouts::TTS_TIMEOUT_MS
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_elevenlabs_endpoint(),
            voice_id: default_voice_id(),
            model: default_tts_model(),
            language: default_language(),
            api_key: None,
            timeout_ms: default_tts_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory
///
/// Sources, lowest precedence first: `<dir>/default.*`, `<dir>/<env>.*`,
/// `VOICE_BRIDGE__*` environment variables, then credential fallbacks.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&dir.join(env_name).to_string_lossy()).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_BRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;
    settings.apply_credential_fallbacks();

    // Validate
    settings.validate()?;

    tracing::debug!(
        env = env.unwrap_or("default"),
        port = settings.server.port,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.audio.input_sample_rate, 8000);
        assert_eq!(settings.audio.output_sample_rate, 8000);
        assert!((settings.turn.stop_secs - 0.2).abs() < f32::EPSILON);
        assert_eq!(settings.turn.semantic_timeout_ms, 1500);
        assert!(settings.pipeline.allow_interruptions);
        assert_eq!(settings.providers.tts.voice_id, "Xb7hH8MSUJpSbSDYk0k2");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_turn_validation() {
        let mut settings = Settings::default();
        settings.turn.stop_secs = 0.0;
        assert!(settings.validate_turn().is_err());
        settings.turn.stop_secs = 0.2;

        settings.turn.semantic_timeout_ms = 50;
        assert!(settings.validate_turn().is_err());
        settings.turn.semantic_timeout_ms = 20_000;
        assert!(settings.validate_turn().is_err());
        settings.turn.semantic_timeout_ms = 1000;
        assert!(settings.validate_turn().is_ok());

        settings.turn.vad_threshold_db = 3.0;
        assert!(settings.validate_turn().is_err());
    }

    #[test]
    fn test_audio_validation() {
        let mut settings = Settings::default();
        settings.audio.output_sample_rate = 11025;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "audio.output_sample_rate"
        ));
    }

    #[test]
    fn test_pipeline_and_persona_validation() {
        let mut settings = Settings::default();
        settings.pipeline.channel_capacity = 0;
        assert!(settings.validate().is_err());
        settings.pipeline.channel_capacity = 8;

        settings.persona.system_prompt = "   ".to_string();
        assert!(matches!(settings.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_fallback_value_prefers_configured() {
        assert_eq!(
            fallback_value(Some("cfg".into()), Some("env".into())),
            Some("cfg".to_string())
        );
        assert_eq!(
            fallback_value(Some(String::new()), Some("env".into())),
            Some("env".to_string())
        );
        assert_eq!(fallback_value(None, Some(String::new())), None);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();

        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(default, "[turn]\nstop_secs = 0.3\n\n[pipeline]\nallow_interruptions = false").unwrap();

        let mut staging = std::fs::File::create(dir.path().join("staging.toml")).unwrap();
        writeln!(staging, "[turn]\nsemantic_timeout_ms = 2000").unwrap();

        let settings = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert!((settings.turn.stop_secs - 0.3).abs() < f32::EPSILON);
        assert_eq!(settings.turn.semantic_timeout_ms, 2000);
        assert!(!settings.pipeline.allow_interruptions);
        assert_eq!(settings.audio.input_sample_rate, 8000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(default, "[pipeline]\nchannel_capacity = 0").unwrap();

        assert!(load_settings_from(dir.path(), None).is_err());
    }
}
