//! Language-model provider seam and the Ollama chat client.

use std::time::Duration;

use async_trait::async_trait;
use loanq_core::config::ProviderConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Text-in, text-out completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` under the `system` instructions.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Non-streaming client for Ollama's `/api/chat` endpoint.
pub struct OllamaProvider {
    http: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_MAX_MS: u64 = 10_000;

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = config.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProviderError::InvalidEndpoint(config.endpoint.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: format!("{}/api/chat", endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    async fn send(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                snippet: text.chars().take(200).collect(),
            });
        }

        let reply: ChatReply = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        reply
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::Decode("reply has no message".to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout_secs)
        } else {
            ProviderError::Transport(err)
        }
    }
}

/// Exponential delay before retry `attempt`, capped at `BACKOFF_MAX_MS`.
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1u64
        .checked_shl(attempt)
        .and_then(|factor| BACKOFF_BASE_MS.checked_mul(factor))
        .map_or(BACKOFF_MAX_MS, |ms| ms.min(BACKOFF_MAX_MS));
    Duration::from_millis(ms)
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send(system, prompt).await {
                Ok(text) => {
                    debug!(model = %self.model, chars = text.len(), "Provider reply received");
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        "Provider call failed: {}. Retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}
