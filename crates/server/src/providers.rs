//! Process-wide speech and language providers
//!
//! Built once at startup and shared read-only by every session.

use std::sync::Arc;
use voice_bridge_config::Settings;
use voice_bridge_core::{LanguageModel, SpeechToText, TextToSpeech};
use voice_bridge_llm::{OpenAIBackend, OpenAIConfig};
use voice_bridge_pipeline::{HttpStt, HttpSttConfig, HttpTts, HttpTtsConfig};

use crate::session::sample_rate;
use crate::ServerError;

/// Provider handles cloned into each session's stages
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl Providers {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self { stt, llm, tts }
    }

    /// HTTP speech providers and an OpenAI-compatible language model
    pub fn from_settings(settings: &Settings) -> Result<Self, ServerError> {
        let output_rate = sample_rate(settings.audio.output_sample_rate)?;

        let stt = HttpStt::new(HttpSttConfig::from(&settings.providers.stt))
            .map_err(|e| ServerError::Provider(e.to_string()))?;
        let llm = OpenAIBackend::new(OpenAIConfig::from(&settings.providers.llm))
            .map_err(|e| ServerError::Provider(e.to_string()))?;
        let tts = HttpTts::new(HttpTtsConfig::from_provider(
            &settings.providers.tts,
            output_rate,
        ))
        .map_err(|e| ServerError::Provider(e.to_string()))?;

        tracing::info!(
            stt = stt.model_name(),
            llm = llm.model_name(),
            voice = tts.voice_name(),
            "Providers initialized"
        );

        Ok(Self::new(Arc::new(stt), Arc::new(llm), Arc::new(tts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_llm_requires_key() {
        let mut settings = Settings::default();
        settings.providers.llm.api_key = None;
        assert!(matches!(
            Providers::from_settings(&settings),
            Err(ServerError::Provider(_))
        ));

        settings.providers.llm.api_key = Some("sk-test".into());
        let providers = Providers::from_settings(&settings).unwrap();
        assert_eq!(providers.llm.model_name(), settings.providers.llm.model);
    }
}
