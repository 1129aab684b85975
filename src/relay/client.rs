//! HTTP client for the relay server.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;
use crate::types::{ChatMessage, ContextData, HistoryTurn, ModelInfo, Usage};

/// Prior turns forwarded with each message.
pub const MAX_FORWARDED_HISTORY: usize = 10;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    message: &'a str,
    model: &'a str,
    context: &'a ContextData,
    history: Vec<HistoryTurn>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    models: Vec<ModelInfo>,
}

/// The newest prior turns as `{role, content}` pairs.
///
/// `history` must not include the message being sent: it travels in the
/// request's `message` field, so including it here would send it twice.
/// Error messages are transcript-only and never forwarded.
pub fn recent_history(history: &[ChatMessage]) -> Vec<HistoryTurn> {
    let turns: Vec<&ChatMessage> = history.iter().filter(|m| !m.is_error).collect();
    let start = turns.len().saturating_sub(MAX_FORWARDED_HISTORY);
    turns[start..].iter().map(|m| HistoryTurn::from(*m)).collect()
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One POST to `/api/chat`. Never retried.
    pub async fn chat(
        &self,
        message: &str,
        model: &str,
        context: &ContextData,
        prior: &[ChatMessage],
    ) -> Result<ChatReply, ClientError> {
        let body = ChatRequestBody {
            message,
            model,
            context,
            history: recent_history(prior),
        };
        debug!(
            model,
            history = body.history.len(),
            "Posting chat request to relay"
        );

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// `GET /api/models`.
    pub async fn models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/models", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let list: ModelList = response.json().await?;
        Ok(list.models)
    }
}
