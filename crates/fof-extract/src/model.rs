//! Language-model completion capability and an OpenAI-compatible client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model endpoint not configured")]
    NotConfigured,
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response could not be decoded: {0}")]
    Decode(String),
}

/// Single-shot text completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ChatModelConfig {
    /// Full `.../chat/completions` URL.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// `/chat/completions` client. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: ChatModelConfig,
}

impl OpenAiChatModel {
    pub fn new(client: reqwest::Client, config: ChatModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let api_key = self.config.api_key.as_deref().ok_or(ModelError::NotConfigured)?;
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let span = info_span!("model_complete", model = %self.config.model);
        async {
            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(api_key)
                .timeout(self.config.timeout)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(ModelError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let parsed: ChatResponse =
                serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;
            // An empty completion is the model finding nothing, not an outage.
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .unwrap_or_default();
            debug!(chars = content.len(), "model completion received");
            Ok(content)
        }
        .instrument(span)
        .await
    }
}
