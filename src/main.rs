//! `page-chat`: the extension side, driven from a terminal.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use page_chat::browser::{ChromeTab, DEFAULT_DEBUG_URL};
use page_chat::config::{self, ClientConfig};
use page_chat::context::{ContextSources, ContextToggles, PageSource, ScreenshotSource};
use page_chat::messaging::{ContentAgent, ExtensionMessage, MessageResponse};
use page_chat::page::{PageHost, StaticPage};
use page_chat::picker::capture_element;
use page_chat::relay::RelayClient;
use page_chat::session::{ChatSession, RenderSurface, SendOutcome, StatusKind};
use page_chat::store::JsonFileStore;
use page_chat::types::{ChatMessage, Role};

#[derive(Parser)]
#[command(name = "page-chat")]
#[command(version, about = "Ask questions about a web page through the relay")]
struct Cli {
    #[command(flatten)]
    client: ClientConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the extracted summary of a page
    Extract {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Send one message, with optional page context
    Ask {
        message: String,

        #[command(flatten)]
        page: PageArgs,

        /// Attach the page summary
        #[arg(long)]
        with_page: bool,

        /// Attach a screenshot (needs --chrome)
        #[arg(long)]
        with_screenshot: bool,

        /// Attach the currently selected element
        #[arg(long)]
        with_element: bool,

        /// Select the first element matching this CSS selector and attach it (needs --file)
        #[arg(long, value_name = "CSS")]
        element: Option<String>,

        /// Model to use from now on
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the saved conversation
    History,

    /// Forget the conversation
    Clear {
        /// Also drop the selected element
        #[arg(long)]
        element: bool,
    },

    /// List the models the relay offers
    Models,
}

#[derive(Args)]
struct PageArgs {
    /// Read a saved HTML file
    #[arg(long, conflicts_with = "chrome")]
    file: Option<PathBuf>,

    /// URL to report for --file
    #[arg(long, requires = "file")]
    url: Option<String>,

    /// Read the first tab of a Chrome with remote debugging, launching one if needed
    #[arg(long)]
    chrome: bool,

    #[arg(long, default_value = DEFAULT_DEBUG_URL)]
    debug_url: String,

    /// Open this address in the Chrome tab first
    #[arg(long, requires = "chrome")]
    open: Option<String>,
}

enum Page {
    File(ContentAgent<StaticPage>),
    Chrome(ChromeTab),
}

impl Page {
    fn sources(&self) -> ContextSources<'_> {
        match self {
            Page::File(agent) => ContextSources {
                page: Some(agent as &dyn PageSource),
                screenshot: None,
            },
            Page::Chrome(tab) => ContextSources {
                page: Some(tab as &dyn PageSource),
                screenshot: Some(tab as &dyn ScreenshotSource),
            },
        }
    }
}

impl PageArgs {
    async fn open(&self) -> Result<Option<Page>> {
        if let Some(path) = &self.file {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let url = self
                .url
                .clone()
                .unwrap_or_else(|| format!("file://{}", path.display()));
            return Ok(Some(Page::File(ContentAgent::new(StaticPage::new(url, &html)))));
        }

        if self.chrome {
            let debug_url = self.debug_url.clone();
            let open = self.open.clone();
            let tab = tokio::task::spawn_blocking(move || {
                let tab = ChromeTab::attach_or_launch(&debug_url, false)?;
                if let Some(url) = open {
                    tab.navigate(&url)?;
                }
                Ok::<_, page_chat::error::CaptureError>(tab)
            })
            .await
            .map_err(|e| anyhow!("Browser launch panicked: {e}"))??;
            return Ok(Some(Page::Chrome(tab)));
        }

        Ok(None)
    }
}

/// Transcript on stdout, everything else on stderr.
struct TerminalSurface;

impl RenderSurface for TerminalSurface {
    fn show_message(&self, message: &ChatMessage) {
        match message.role {
            Role::User => {
                let tags = message
                    .context
                    .iter()
                    .flatten()
                    .map(|flag| flag.label())
                    .collect::<Vec<_>>();
                if tags.is_empty() {
                    println!("you> {}", message.content);
                } else {
                    println!("you> {} [{}]", message.content, tags.join(", "));
                }
            }
            Role::Assistant if message.is_error => eprintln!("{}", message.content),
            Role::Assistant => println!("assistant> {}\n", message.content),
        }
    }

    fn show_status(&self, text: &str, kind: StatusKind) {
        match kind {
            StatusKind::Warning => eprintln!("warning: {text}"),
            StatusKind::Info | StatusKind::Success => eprintln!("{text}"),
        }
    }

    fn clear_status(&self) {}

    fn set_busy(&self, busy: bool) {
        if busy {
            eprintln!("Thinking...");
        }
    }

    fn show_element_preview(&self, preview: Option<&str>) {
        if let Some(preview) = preview {
            eprintln!("selected: {preview}");
        }
    }

    fn clear_transcript(&self) {}
}

fn open_session(client: &ClientConfig, surface: impl RenderSurface + 'static) -> Result<ChatSession> {
    let session = ChatSession::new(
        RelayClient::new(&client.server),
        Box::new(JsonFileStore::new(client.state_path())),
        Box::new(surface),
    );
    if let Err(err) = session.restore() {
        // An unreadable state file has already been moved aside.
        warn!(error = %err, "Starting with an empty session");
    }
    Ok(session)
}

/// For commands whose output is not the transcript.
struct QuietSurface;

impl RenderSurface for QuietSurface {
    fn show_message(&self, _message: &ChatMessage) {}
    fn show_status(&self, _text: &str, _kind: StatusKind) {}
    fn clear_status(&self) {}
    fn set_busy(&self, _busy: bool) {}
    fn show_element_preview(&self, _preview: Option<&str>) {}
    fn clear_transcript(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    config::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Extract { page } => {
            let summary = match page.open().await? {
                Some(page) => match page.sources().page {
                    Some(source) => source.page_summary().await?,
                    None => bail!("This page has no readable content"),
                },
                None => bail!("Pass --file <HTML> or --chrome"),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Ask {
            message,
            page,
            with_page,
            with_screenshot,
            with_element,
            element,
            model,
        } => {
            let session = open_session(&cli.client, TerminalSurface)?;
            if let Some(model) = model {
                session.set_model(model);
            }

            let mut page = page.open().await?;
            if let Some(css) = &element {
                let Some(Page::File(agent)) = page.as_mut() else {
                    bail!("--element needs --file");
                };
                let node = agent
                    .host()
                    .node(css)
                    .with_context(|| format!("No element matches `{css}`"))?;
                let description = agent
                    .host()
                    .describe(&node)
                    .with_context(|| format!("`{css}` cannot be described"))?;
                let selected = ExtensionMessage::ElementSelected {
                    data: capture_element(description),
                };
                if let MessageResponse::Error { error } = agent.handle(selected, &session).await {
                    bail!(error);
                }
            }

            let toggles = ContextToggles {
                page: with_page,
                screenshot: with_screenshot,
                element: with_element || element.is_some(),
            };
            let sources = page.as_ref().map(Page::sources).unwrap_or_default();

            match session.send(&message, toggles, sources).await {
                SendOutcome::Replied(_) => {}
                SendOutcome::Failed(_) => bail!("Chat turn failed"),
                SendOutcome::Skipped => warn!("Nothing to send"),
            }
        }

        Command::History => {
            let session = open_session(&cli.client, TerminalSurface)?;
            if session.history().is_empty() {
                eprintln!("No messages yet.");
            }
        }

        Command::Clear { element } => {
            let session = open_session(&cli.client, QuietSurface)?;
            session.clear_chat();
            if element {
                session.clear_element();
            }
            eprintln!("Chat cleared!");
        }

        Command::Models => {
            let session = open_session(&cli.client, QuietSurface)?;
            let current = session.model();
            let models = RelayClient::new(&cli.client.server).models().await?;
            for model in models {
                let marker = if model.id == current { "*" } else { " " };
                let vision = if model.vision { " (vision)" } else { "" };
                println!("{marker} {:<45} {}{vision}", model.id, model.name);
            }
        }
    }

    Ok(())
}
