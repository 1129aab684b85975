//! `relay`: holds the API key and forwards chat turns to the completion API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use page_chat::config::{self, RelayConfig};
use page_chat::relay::{AppState, GroqClient, serve};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Relay between the page-chat extension and the completion API")]
struct Cli {
    #[command(flatten)]
    relay: RelayConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    config::init_tracing();

    let cli = Cli::parse();
    let api_key = cli.relay.api_key();
    if api_key.is_none() {
        warn!("GROQ_API_KEY is not set; chat requests will fail until it is");
    }

    let state = Arc::new(AppState {
        upstream: Arc::new(GroqClient::new(&cli.relay.upstream_url, api_key)),
        development: cli.relay.dev,
    });

    let addr = cli.relay.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(upstream = %cli.relay.upstream_url, "Forwarding completions");

    serve(listener, state).await?;
    Ok(())
}
