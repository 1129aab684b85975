//! The relay: the extension-side HTTP client, and the server that turns a
//! chat request into an upstream completion.

pub mod client;
pub mod prompt;
pub mod server;
pub mod upstream;

pub use client::{ChatReply, RelayClient};
pub use server::{AppState, router, serve};
pub use upstream::{CompletionApi, GroqClient};
