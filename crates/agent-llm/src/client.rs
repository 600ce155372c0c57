use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use message_bus::{Patch, PatchSink};

use crate::error::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_REASONER_MODEL: &str = "deepseek-reasoner";
const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Streaming text generation against a single prompt.
///
/// Implementations stream deltas into the message identified by
/// `message_id` through the sink and return the full content string. With
/// `publish_content == false` content patches are suppressed while the
/// accumulator still grows; the caller publishes a single replacement once
/// post-processing succeeds.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn stream_generate(
        &self,
        prompt: &str,
        message_id: &str,
        publish_content: bool,
        sink: &dyn PatchSink,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LlmStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_thinking_chars: u64,
    pub total_content_chars: u64,
}

/// OpenAI-compatible streaming chat client. The reasoner model interleaves
/// `reasoning_content` deltas before the answer; the chat model emits
/// content only.
pub struct DeepSeekClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    supports_reasoning: bool,
    max_tokens: u32,
    temperature: f32,
    stats: Mutex<LlmStats>,
}

impl DeepSeekClient {
    pub fn reasoner(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_REASONER_MODEL, true)
    }

    pub fn chat(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_CHAT_MODEL, false)
    }

    fn new(api_key: impl Into<String>, model: &str, supports_reasoning: bool) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            supports_reasoning,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stats: Mutex::new(LlmStats::default()),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn stats(&self) -> LlmStats {
        self.stats.lock().await.clone()
    }

    async fn publish(&self, sink: &dyn PatchSink, patch: Patch) {
        // A delta that cannot be delivered must not abort generation; the
        // caller still gets the full content string.
        if let Err(error) = sink.publish(patch).await {
            log::warn!("[llm] failed to publish patch: {error}");
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for DeepSeekClient {
    async fn stream_generate(
        &self,
        prompt: &str,
        message_id: &str,
        publish_content: bool,
        sink: &dyn PatchSink,
    ) -> Result<String, LlmError> {
        self.stats.lock().await.total_calls += 1;
        log::info!(
            "[llm] streaming {} for message {} ({} prompt chars)",
            self.model,
            message_id,
            prompt.len()
        );

        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": true,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let result = self
            .consume_stream(&body, message_id, publish_content, sink)
            .await;

        let mut stats = self.stats.lock().await;
        match &result {
            Ok(content) => {
                stats.successful_calls += 1;
                stats.total_content_chars += content.len() as u64;
                log::info!(
                    "[llm] finished message {} ({} content chars)",
                    message_id,
                    content.len()
                );
            }
            Err(error) => {
                stats.failed_calls += 1;
                log::error!("[llm] generation failed for message {message_id}: {error}");
            }
        }
        result
    }
}

impl DeepSeekClient {
    async fn consume_stream(
        &self,
        body: &serde_json::Value,
        message_id: &str,
        publish_content: bool,
        sink: &dyn PatchSink,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {text}")));
        }

        let mut events = response.bytes_stream().eventsource();
        let mut full_content = String::new();
        let mut full_thinking = String::new();
        let mut reasoning_phase = true;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            let chunk: StreamChunk = serde_json::from_str(data)
                .map_err(|e| LlmError::Stream(format!("bad chunk: {e}")))?;
            let Some(choice) = chunk.choices.first() else {
                continue;
            };

            if let Some(reasoning) = choice
                .delta
                .reasoning_content
                .as_deref()
                .filter(|s| !s.is_empty())
            {
                if self.supports_reasoning {
                    full_thinking.push_str(reasoning);
                    self.publish(
                        sink,
                        Patch {
                            message_id: Some(message_id.to_string()),
                            thinking_delta: reasoning.to_string(),
                            ..Default::default()
                        },
                    )
                    .await;
                }
                continue;
            }

            if let Some(content) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
                if reasoning_phase {
                    reasoning_phase = false;
                    log::debug!(
                        "[llm] reasoning phase ended for message {} ({} thinking chars)",
                        message_id,
                        full_thinking.len()
                    );
                }
                full_content.push_str(content);
                if publish_content {
                    self.publish(
                        sink,
                        Patch {
                            message_id: Some(message_id.to_string()),
                            content_delta: content.to_string(),
                            ..Default::default()
                        },
                    )
                    .await;
                }
            }
        }

        self.stats.lock().await.total_thinking_chars += full_thinking.len() as u64;
        self.publish(
            sink,
            Patch {
                message_id: Some(message_id.to_string()),
                finished: true,
                ..Default::default()
            },
        )
        .await;

        Ok(full_content)
    }
}
