//! Error types for page-chat.
//!
//! Each concern gets its own `thiserror` enum so callers can tell a failed
//! capture (the turn continues) from a failed relay call (the turn fails).

use thiserror::Error;

/// Failure reading page content or capturing a screenshot.
///
/// These never abort a chat turn; the context part is simply left out.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No active tab")]
    NoActiveTab,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Page read failed: {0}")]
    PageRead(String),

    #[error("Capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure talking to the relay server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Server error: {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Failure reported by the upstream inference API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Missing API key")]
    MissingApiKey,

    #[error("Invalid API key: {0}")]
    Unauthorized(String),

    #[error("Upstream rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Upstream API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Server-side classification of a failed chat request.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Message is required")]
    MissingMessage,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid or missing GROQ_API_KEY")]
    Unauthorized(#[source] UpstreamError),

    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimited(#[source] UpstreamError),

    #[error("{0}")]
    Upstream(#[source] UpstreamError),
}

impl From<UpstreamError> for RelayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::MissingApiKey | UpstreamError::Unauthorized(_) => {
                RelayError::Unauthorized(err)
            }
            UpstreamError::RateLimited(_) => RelayError::RateLimited(err),
            other => RelayError::Upstream(other),
        }
    }
}

/// Failure loading or saving persisted state.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
