//! HTTP speech-to-text backend
//!
//! Buffers caller audio into utterances using an energy gate and posts each
//! utterance to a Deepgram-compatible `/v1/listen` endpoint. Every response
//! becomes one final transcript.

use futures::StreamExt;
use serde::Deserialize;
use std::time::{Duration, Instant};
use voice_bridge_config::SttProviderConfig;
use voice_bridge_core::{AudioStream, SampleRate, SpeechToText, TranscriptResult, TranscriptStream};

use crate::PipelineError;

/// HTTP STT configuration
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    /// Base URL of the service
    pub endpoint: String,
    pub model: String,
    pub language: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    /// Frames quieter than this count as silence
    pub silence_threshold_db: f32,
    /// Trailing silence that closes an utterance
    pub end_silence: Duration,
    /// Utterances with less speech than this are discarded
    pub min_speech: Duration,
    /// Utterances are sent once they reach this length
    pub max_utterance: Duration,
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self {
            endpoint: voice_bridge_config::constants::endpoints::DEEPGRAM_DEFAULT.to_string(),
            model: voice_bridge_config::constants::providers::STT_MODEL.to_string(),
            language: voice_bridge_config::constants::providers::LANGUAGE.to_string(),
            api_key: None,
            timeout_ms: voice_bridge_config::constants::timeouts::STT_TIMEOUT_MS,
            silence_threshold_db: voice_bridge_config::constants::turn::VAD_THRESHOLD_DB,
            end_silence: Duration::from_millis(300),
            min_speech: Duration::from_millis(100),
            max_utterance: Duration::from_secs(15),
        }
    }
}

impl From<&SttProviderConfig> for HttpSttConfig {
    fn from(config: &SttProviderConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

impl ListenResponse {
    fn best(self) -> Option<ListenAlternative> {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
    }
}

/// Accumulates one utterance between silences
#[derive(Debug, Default)]
struct UtteranceBuffer {
    samples: Vec<f32>,
    total: Duration,
    speech: Duration,
    trailing_silence: Duration,
}

impl UtteranceBuffer {
    /// Add a frame; returns a complete utterance when one closes
    fn push(
        &mut self,
        samples: &[f32],
        duration: Duration,
        silent: bool,
        config: &HttpSttConfig,
    ) -> Option<Vec<f32>> {
        if silent && self.samples.is_empty() {
            return None;
        }

        self.samples.extend_from_slice(samples);
        self.total += duration;
        if silent {
            self.trailing_silence += duration;
        } else {
            self.trailing_silence = Duration::ZERO;
            self.speech += duration;
        }

        if self.trailing_silence >= config.end_silence || self.total >= config.max_utterance {
            self.take(config)
        } else {
            None
        }
    }

    fn take(&mut self, config: &HttpSttConfig) -> Option<Vec<f32>> {
        let enough = self.speech >= config.min_speech;
        let samples = std::mem::take(&mut self.samples);
        self.total = Duration::ZERO;
        self.speech = Duration::ZERO;
        self.trailing_silence = Duration::ZERO;
        enough.then_some(samples)
    }
}

/// HTTP STT backend
pub struct HttpStt {
    config: HttpSttConfig,
    client: reqwest::Client,
}

impl HttpStt {
    pub fn new(config: HttpSttConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Stt(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            language = %config.language,
            "HTTP STT backend configured"
        );

        Ok(Self { config, client })
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: SampleRate,
    ) -> Result<Option<TranscriptResult>, PipelineError> {
        let pcm_bytes: Vec<u8> = samples
            .iter()
            .flat_map(|&s| ((s.clamp(-1.0, 1.0) * 32767.0) as i16).to_le_bytes())
            .collect();

        let url = format!("{}/v1/listen", self.config.endpoint.trim_end_matches('/'));
        let rate = sample_rate.as_u32().to_string();
        let mut request = self
            .client
            .post(&url)
            .query(&[
                ("model", self.config.model.as_str()),
                ("language", self.config.language.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", rate.as_str()),
                ("channels", "1"),
                ("punctuate", "true"),
            ])
            .header("Content-Type", "application/octet-stream")
            .body(pcm_bytes);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Token {}", key));
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Stt(format!("STT request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Stt(format!(
                "STT service returned error: {}",
                response.status()
            )));
        }

        let body: ListenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Stt(format!("Failed to parse STT response: {}", e)))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            samples = samples.len(),
            "Utterance transcribed"
        );

        Ok(body
            .best()
            .filter(|alt| !alt.transcript.trim().is_empty())
            .map(|alt| TranscriptResult::final_text(alt.transcript, alt.confidence)))
    }
}

impl SpeechToText for HttpStt {
    fn transcribe_stream<'a>(&'a self, mut audio: AudioStream<'a>) -> TranscriptStream<'a> {
        Box::pin(async_stream::stream! {
            let mut buffer = UtteranceBuffer::default();
            let mut sample_rate = SampleRate::default();

            while let Some(frame) = audio.next().await {
                sample_rate = frame.sample_rate;
                let silent = frame.is_likely_silence(self.config.silence_threshold_db);
                let Some(utterance) = buffer.push(&frame.samples, frame.duration, silent, &self.config) else {
                    continue;
                };
                match self.transcribe(&utterance, sample_rate).await {
                    Ok(Some(result)) => yield Ok(result),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(voice_bridge_core::Error::from(e));
                        return;
                    }
                }
            }

            // Audio ended mid-utterance
            if let Some(utterance) = buffer.take(&self.config) {
                match self.transcribe(&utterance, sample_rate).await {
                    Ok(Some(result)) => yield Ok(result),
                    Ok(None) => {}
                    Err(e) => yield Err(voice_bridge_core::Error::from(e)),
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(20);

    fn push(buffer: &mut UtteranceBuffer, silent: bool, config: &HttpSttConfig) -> Option<Vec<f32>> {
        buffer.push(&[0.1; 160], FRAME, silent, config)
    }

    #[test]
    fn test_leading_silence_skipped() {
        let config = HttpSttConfig::default();
        let mut buffer = UtteranceBuffer::default();
        for _ in 0..50 {
            assert!(push(&mut buffer, true, &config).is_none());
        }
        assert!(buffer.samples.is_empty());
    }

    #[test]
    fn test_utterance_closes_after_trailing_silence() {
        let config = HttpSttConfig::default();
        let mut buffer = UtteranceBuffer::default();

        for _ in 0..10 {
            assert!(push(&mut buffer, false, &config).is_none());
        }
        // 300ms of silence closes the utterance on the 15th quiet frame
        for _ in 0..14 {
            assert!(push(&mut buffer, true, &config).is_none());
        }
        let utterance = push(&mut buffer, true, &config).unwrap();
        assert_eq!(utterance.len(), 25 * 160);
        assert!(buffer.samples.is_empty());
    }

    #[test]
    fn test_short_blip_discarded() {
        let config = HttpSttConfig::default();
        let mut buffer = UtteranceBuffer::default();

        push(&mut buffer, false, &config);
        let mut closed = None;
        for _ in 0..15 {
            closed = closed.or(push(&mut buffer, true, &config));
        }
        assert!(closed.is_none());
        assert!(buffer.samples.is_empty());
    }

    #[test]
    fn test_parse_listen_response() {
        let body = r#"{"metadata":{},"results":{"channels":[{"alternatives":[
            {"transcript":"what time is it","confidence":0.93}]}]}}"#;
        let response: ListenResponse = serde_json::from_str(body).unwrap();
        let best = response.best().unwrap();
        assert_eq!(best.transcript, "what time is it");
        assert!((best.confidence - 0.93).abs() < 1e-6);

        let empty: ListenResponse = serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert!(empty.best().is_none());
    }
}
