//! Messages exchanged between the panel, the page agent and the background
//! worker, and the page agent that answers them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{PageSource, ScreenshotSource};
use crate::error::CaptureError;
use crate::page::PageHost;
use crate::picker::{Picker, PickerOutcome};
use crate::session::{ChatSession, StatusKind};
use crate::types::{PageSummary, PickedElement};

pub const PICKING_STATUS: &str = "Click on an element to select it...";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionMessage {
    TogglePanel,
    GetPageContent,
    EnablePicker,
    DisablePicker,
    ElementSelected { data: PickedElement },
    CaptureScreenshot,
}

impl ExtensionMessage {
    /// Parse a raw message; unknown or malformed types become an error reply.
    pub fn from_value(value: Value) -> Result<Self, MessageResponse> {
        serde_json::from_value(value).map_err(|err| {
            debug!(error = %err, "Rejected extension message");
            MessageResponse::error("Unknown message type")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageResponse {
    Ack { success: bool },
    PageContent(PageSummary),
    /// The bare data URL.
    Screenshot(String),
    Error { error: String },
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self::Ack { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Per-page agent: owns the page, the picker and the panel visibility.
pub struct ContentAgent<H: PageHost> {
    host: H,
    picker: Picker<H::Node>,
    panel_open: bool,
    screenshots: Option<Box<dyn ScreenshotSource>>,
}

impl<H: PageHost> ContentAgent<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            picker: Picker::new(),
            panel_open: false,
            screenshots: None,
        }
    }

    /// Route CAPTURE_SCREENSHOT to `source`.
    pub fn with_screenshots(mut self, source: Box<dyn ScreenshotSource>) -> Self {
        self.screenshots = Some(source);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn picker(&self) -> &Picker<H::Node> {
        &self.picker
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel_open
    }

    /// Show or hide the panel. Hiding it also stops picking.
    pub fn toggle_panel(&mut self) -> bool {
        self.panel_open = !self.panel_open;
        if !self.panel_open {
            self.picker.disable(&mut self.host);
        }
        self.panel_open
    }

    /// The panel's element button: start picking, or stop if already picking.
    pub fn toggle_picking(&mut self, session: &ChatSession) -> bool {
        if self.picker.disable(&mut self.host) {
            session.surface().clear_status();
            return false;
        }
        self.picker.enable(&mut self.host);
        session.surface().show_status(PICKING_STATUS, StatusKind::Info);
        true
    }

    pub async fn handle(&mut self, message: ExtensionMessage, session: &ChatSession) -> MessageResponse {
        match message {
            ExtensionMessage::TogglePanel => {
                self.toggle_panel();
                MessageResponse::ok()
            }
            ExtensionMessage::GetPageContent => {
                MessageResponse::PageContent(self.host.page_summary())
            }
            ExtensionMessage::EnablePicker => {
                self.picker.enable(&mut self.host);
                MessageResponse::ok()
            }
            ExtensionMessage::DisablePicker => {
                self.picker.disable(&mut self.host);
                MessageResponse::ok()
            }
            ExtensionMessage::ElementSelected { data } => {
                session.select_element(data);
                MessageResponse::ok()
            }
            ExtensionMessage::CaptureScreenshot => match self.capture_screenshot().await {
                Ok(screenshot) => MessageResponse::Screenshot(screenshot),
                Err(err) => {
                    warn!(error = %err, "Screenshot capture failed");
                    MessageResponse::error(err.to_string())
                }
            },
        }
    }

    /// Entry point for untyped messages.
    pub async fn handle_value(&mut self, value: Value, session: &ChatSession) -> MessageResponse {
        match ExtensionMessage::from_value(value) {
            Ok(message) => self.handle(message, session).await,
            Err(response) => response,
        }
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) -> PickerOutcome {
        self.picker.pointer_move(&mut self.host, x, y)
    }

    /// A completed pick goes straight to the session.
    pub fn click(&mut self, target: &H::Node, session: &ChatSession) -> PickerOutcome {
        let outcome = self.picker.click(&mut self.host, target);
        if let PickerOutcome::Picked(element) = &outcome {
            session.select_element(element.clone());
        }
        outcome
    }

    pub fn key_down(&mut self, key: &str, session: &ChatSession) -> PickerOutcome {
        let outcome = self.picker.key_down(&mut self.host, key);
        if outcome == PickerOutcome::Cancelled {
            session.surface().clear_status();
        }
        outcome
    }
}

#[async_trait(?Send)]
impl<H: PageHost> PageSource for ContentAgent<H> {
    async fn page_summary(&self) -> Result<PageSummary, CaptureError> {
        Ok(self.host.page_summary())
    }
}

#[async_trait(?Send)]
impl<H: PageHost> ScreenshotSource for ContentAgent<H> {
    async fn capture_screenshot(&self) -> Result<String, CaptureError> {
        match &self.screenshots {
            Some(source) => source.capture_screenshot().await,
            None => Err(CaptureError::NoActiveTab),
        }
    }
}
