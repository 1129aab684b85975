//! Command-line and environment configuration for both binaries.

use std::path::PathBuf;

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::relay::client::DEFAULT_SERVER_URL;
use crate::relay::upstream::DEFAULT_UPSTREAM_URL;
use crate::store::default_state_path;

#[derive(Debug, Clone, Args)]
pub struct RelayConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Interface to bind
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Completion API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "GROQ_BASE_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// Return error detail in 500 responses
    #[arg(long, env = "RELAY_DEV")]
    pub dev: bool,
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Empty keys count as missing.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ClientConfig {
    /// Relay server base URL
    #[arg(long, env = "PAGE_CHAT_SERVER", default_value = DEFAULT_SERVER_URL, global = true)]
    pub server: String,

    /// Where the session is persisted
    #[arg(long, env = "PAGE_CHAT_STATE", global = true)]
    pub state: Option<PathBuf>,
}

impl ClientConfig {
    pub fn state_path(&self) -> PathBuf {
        self.state.clone().unwrap_or_else(default_state_path)
    }
}

/// Load `.env` if present. Real environment variables win.
pub fn load_env() {
    dotenvy::dotenv().ok();
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
