//! Upstream inference API.
//!
//! Speaks the OpenAI-compatible chat completions protocol Groq exposes. The
//! [`CompletionApi`] trait is the seam the relay server is tested through.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::UpstreamError;
use crate::types::Usage;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.groq.com/openai/v1";
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_OUTPUT_TOKENS: u32 = 2048;
pub const EMPTY_COMPLETION: &str = "No response generated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: MessageContent,
}

impl CompletionMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
        }
    }
}

/// Message content (string or array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Request with the relay's fixed sampling settings.
    pub fn new(model: impl Into<String>, messages: Vec<CompletionMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, UpstreamError>;
}

pub struct GroqClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GroqClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

fn error_message(body: &Value, status: StatusCode) -> String {
    body["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown API error ({status})"))
}

#[async_trait]
impl CompletionApi for GroqClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        let json_resp: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

        if !status.is_success() {
            let message = error_message(&json_resp, status);
            return Err(match status {
                StatusCode::UNAUTHORIZED => UpstreamError::Unauthorized(message),
                StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited(message),
                _ => UpstreamError::Api {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .filter(|text| !text.is_empty())
            .unwrap_or(EMPTY_COMPLETION)
            .to_string();
        let usage = serde_json::from_value(json_resp["usage"].clone()).ok();
        debug!(model = %request.model, ?usage, "Upstream completion received");

        Ok(Completion { content, usage })
    }
}
