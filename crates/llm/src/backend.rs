//! OpenAI-compatible chat completions backend
//!
//! Works with OpenAI and any server exposing the same streaming
//! `/chat/completions` API (vLLM, local gateways).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use voice_bridge_config::LlmProviderConfig;
use voice_bridge_core::{GenerationStats, LanguageModel, TranscriptEntry};

use crate::LlmError;

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API endpoint, including the version prefix
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Temperature (0-2)
    pub temperature: f32,
    pub timeout: Duration,
    /// Organization ID (OpenAI specific)
    pub organization: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint: voice_bridge_config::constants::endpoints::OPENAI_DEFAULT.to_string(),
            api_key: None,
            model: voice_bridge_config::constants::providers::LLM_MODEL.to_string(),
            max_tokens: 512,
            temperature: 0.7,
            timeout: Duration::from_millis(voice_bridge_config::constants::timeouts::LLM_REQUEST_MS),
            organization: None,
        }
    }
}

impl OpenAIConfig {
    /// Create config for a local OpenAI-compatible server
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    fn is_local(&self) -> bool {
        self.endpoint.starts_with("http://localhost") || self.endpoint.starts_with("http://127.0.0.1")
    }
}

impl From<&LlmProviderConfig> for OpenAIConfig {
    fn from(config: &LlmProviderConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_millis(config.timeout_ms),
            organization: None,
        }
    }
}

/// OpenAI-compatible backend
pub struct OpenAIBackend {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        let has_key = config.api_key.as_deref().is_some_and(|k| !k.is_empty());
        if !has_key && !config.is_local() {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(key) = &self.config.api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }
        if let Some(org) = &self.config.organization {
            if let Ok(val) = HeaderValue::from_str(org) {
                headers.insert("OpenAI-Organization", val);
            }
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        headers
    }

    fn request<'a>(&'a self, messages: &'a [TranscriptEntry]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAIBackend {
    async fn generate_stream(
        &self,
        messages: &[TranscriptEntry],
        tx: mpsc::Sender<String>,
    ) -> voice_bridge_core::Result<GenerationStats> {
        let start = Instant::now();
        let mut stats = GenerationStats::default();
        let mut first_token_ms = None;

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&self.request(messages))
            .send()
            .await
            .map_err(LlmError::from)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)).into());
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(LlmError::from)?;
            for event in decoder.push(&chunk) {
                let content = match event {
                    SseEvent::Done => break 'read,
                    SseEvent::Content(content) => content,
                };
                if first_token_ms.is_none() {
                    first_token_ms = Some(start.elapsed().as_millis() as u64);
                }
                stats.text.push_str(&content);
                stats.tokens += 1;
                if tx.send(content).await.is_err() {
                    // Receiver gone: the response was cancelled
                    tracing::debug!(model = %self.config.model, "Generation cancelled by consumer");
                    break 'read;
                }
            }
        }

        stats.total_time_ms = start.elapsed().as_millis() as u64;
        stats.time_to_first_token_ms = first_token_ms.unwrap_or(stats.total_time_ms);
        Ok(stats)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Content(String),
    Done,
}

/// Incremental decoder for `data:` lines of a chat completion stream
///
/// Network chunks may split a line (or a UTF-8 sequence) anywhere, so bytes
/// are buffered until a newline arrives.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    let content = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content)
                        .filter(|c| !c.is_empty());
                    if let Some(content) = content {
                        events.push(SseEvent::Content(content));
                    }
                }
                Err(e) => tracing::trace!(error = %e, "Skipping unparseable stream line"),
            }
        }
        events
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OpenAIConfig::default();
        assert_eq!(config.endpoint, "https://api.openai.com/v1");
        assert_eq!(config.model, "gpt-4o");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_backend_creation() {
        assert!(OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000/v1", "llama-3")).is_ok());
        assert!(OpenAIBackend::new(OpenAIConfig::default()).is_err());

        let config = OpenAIConfig {
            api_key: Some("sk-xxx".into()),
            ..Default::default()
        };
        let backend = OpenAIBackend::new(config).unwrap();
        assert_eq!(backend.chat_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization() {
        let backend =
            OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000/v1", "llama-3")).unwrap();
        let messages = vec![
            TranscriptEntry::system("Be brief."),
            TranscriptEntry::user("Hello"),
        ];

        let json = serde_json::to_value(backend.request(&messages)).unwrap();
        assert_eq!(json["model"], "llama-3");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();

        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());

        let events = decoder.push(
            b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: [DONE]\n",
        );
        assert_eq!(
            events,
            vec![SseEvent::Content("Hello".into()), SseEvent::Done]
        );
    }
}
