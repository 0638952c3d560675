//! HTTP text-to-speech backend
//!
//! Streams raw PCM16 from an ElevenLabs-compatible endpoint and re-frames it
//! into 20ms audio frames at the requested output rate.

use futures::StreamExt;
use serde::Serialize;
use std::time::{Duration, Instant};
use voice_bridge_config::TtsProviderConfig;
use voice_bridge_core::{AudioFrame, SampleRate, SynthesisStream, TextToSpeech};

use crate::PipelineError;

/// HTTP TTS configuration
#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    /// Base URL of the service
    pub endpoint: String,
    pub voice_id: String,
    pub model: String,
    pub language: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub sample_rate: SampleRate,
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self {
            endpoint: voice_bridge_config::constants::endpoints::ELEVENLABS_DEFAULT.to_string(),
            voice_id: voice_bridge_config::constants::providers::TTS_VOICE_ID.to_string(),
            model: voice_bridge_config::constants::providers::TTS_MODEL.to_string(),
            language: voice_bridge_config::constants::providers::LANGUAGE.to_string(),
            api_key: None,
            timeout_ms: voice_bridge_config::constants::timeouts::TTS_TIMEOUT_MS,
            sample_rate: SampleRate::Hz8000,
        }
    }
}

impl HttpTtsConfig {
    pub fn from_provider(config: &TtsProviderConfig, sample_rate: SampleRate) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            voice_id: config.voice_id.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
            sample_rate,
        }
    }

    fn output_format(&self) -> String {
        format!("pcm_{}", self.sample_rate.as_u32())
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    language_code: &'a str,
}

/// Splits a PCM16 byte stream into fixed-size frames
///
/// Chunks from the network rarely align with frame or even sample
/// boundaries, so leftover bytes carry over to the next chunk.
#[derive(Debug)]
struct Pcm16Framer {
    sample_rate: SampleRate,
    frame_bytes: usize,
    pending: Vec<u8>,
    sequence: u64,
}

impl Pcm16Framer {
    fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            frame_bytes: sample_rate.frame_size_20ms() * 2,
            pending: Vec::new(),
            sequence: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_bytes {
            let chunk: Vec<u8> = self.pending.drain(..self.frame_bytes).collect();
            frames.push(self.frame(&chunk));
        }
        frames
    }

    /// Emit the trailing partial frame, dropping an odd final byte
    fn finish(&mut self) -> Option<AudioFrame> {
        let usable = self.pending.len() & !1;
        if usable == 0 {
            self.pending.clear();
            return None;
        }
        let chunk: Vec<u8> = self.pending.drain(..usable).collect();
        self.pending.clear();
        Some(self.frame(&chunk))
    }

    fn frame(&mut self, bytes: &[u8]) -> AudioFrame {
        let frame = AudioFrame::from_pcm16(bytes, self.sample_rate, self.sequence);
        self.sequence += 1;
        frame
    }
}

fn tts_error(message: String) -> voice_bridge_core::Error {
    PipelineError::Tts(message).into()
}

/// HTTP TTS backend
pub struct HttpTts {
    config: HttpTtsConfig,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn new(config: HttpTtsConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Tts(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            voice = %config.voice_id,
            format = %config.output_format(),
            "HTTP TTS backend configured"
        );

        Ok(Self { config, client })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.config.endpoint.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

impl TextToSpeech for HttpTts {
    fn synthesize_stream<'a>(&'a self, text: &'a str) -> SynthesisStream<'a> {
        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let body = SpeechRequest {
                text,
                model_id: &self.config.model,
                language_code: &self.config.language,
            };
            let format = self.config.output_format();
            let mut request = self
                .client
                .post(self.stream_url())
                .query(&[("output_format", format.as_str())])
                .json(&body);
            if let Some(key) = &self.config.api_key {
                request = request.header("xi-api-key", key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(tts_error(format!("TTS request failed: {}", e)));
                    return;
                }
            };
            if !response.status().is_success() {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                yield Err(tts_error(format!("TTS service returned {}: {}", status, detail)));
                return;
            }

            let mut framer = Pcm16Framer::new(self.config.sample_rate);
            let mut bytes = response.bytes_stream();
            let mut first_audio = true;
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(tts_error(format!("TTS stream failed: {}", e)));
                        return;
                    }
                };
                for frame in framer.push(&chunk) {
                    if first_audio {
                        first_audio = false;
                        tracing::debug!(
                            ttfb_ms = started.elapsed().as_millis() as u64,
                            chars = text.len(),
                            "First synthesized audio"
                        );
                    }
                    yield Ok(frame);
                }
            }
            if let Some(frame) = framer.finish() {
                yield Ok(frame);
            }
        })
    }

    fn output_sample_rate(&self) -> SampleRate {
        self.config.sample_rate
    }

    fn voice_name(&self) -> &str {
        &self.config.voice_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_carries_partial_bytes() {
        let mut framer = Pcm16Framer::new(SampleRate::Hz8000);
        // 20ms at 8kHz is 160 samples, 320 bytes
        assert!(framer.push(&[0u8; 300]).is_empty());
        let frames = framer.push(&[0u8; 341]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples.len(), 160);
        assert_eq!(frames[1].sequence, 1);

        // 1 byte left over is not a whole sample
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_framer_flushes_tail() {
        let mut framer = Pcm16Framer::new(SampleRate::Hz8000);
        framer.push(&[0u8; 100]);
        let tail = framer.finish().unwrap();
        assert_eq!(tail.samples.len(), 50);
        assert_eq!(tail.sequence, 0);
    }

    #[test]
    fn test_request_shape() {
        let tts = HttpTts::new(HttpTtsConfig {
            endpoint: "https://tts.example.com/".into(),
            voice_id: "voice-1".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            tts.stream_url(),
            "https://tts.example.com/v1/text-to-speech/voice-1/stream"
        );
        assert_eq!(tts.config.output_format(), "pcm_8000");
    }
}
