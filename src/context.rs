//! Context assembly.
//!
//! Combines the enabled context parts into one [`ContextPayload`]. A part
//! whose capture fails keeps its flag but contributes no data; the turn goes
//! ahead with whatever did succeed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CaptureError;
use crate::types::{ContextData, ContextFlag, ContextPayload, PageSummary, PickedElement};

/// The three independent user toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextToggles {
    pub page: bool,
    pub screenshot: bool,
    pub element: bool,
}

/// Reads the page the user is viewing.
#[async_trait(?Send)]
pub trait PageSource {
    async fn page_summary(&self) -> Result<PageSummary, CaptureError>;
}

/// Captures the visible area of the active tab, as a data URL or bare base64.
#[async_trait(?Send)]
pub trait ScreenshotSource {
    async fn capture_screenshot(&self) -> Result<String, CaptureError>;
}

/// Collaborators available for this turn; either may be absent.
#[derive(Clone, Copy, Default)]
pub struct ContextSources<'a> {
    pub page: Option<&'a dyn PageSource>,
    pub screenshot: Option<&'a dyn ScreenshotSource>,
}

/// Build the payload for one send. Flags are appended in the fixed order
/// page, screenshot, element.
pub async fn assemble(
    toggles: ContextToggles,
    sources: ContextSources<'_>,
    element: Option<&PickedElement>,
) -> ContextPayload {
    let mut flags = Vec::new();
    let mut data = ContextData::default();

    if toggles.page {
        flags.push(ContextFlag::Page);
        match sources.page {
            Some(source) => match source.page_summary().await {
                Ok(summary) => data.page_content = Some(summary),
                Err(err) => warn!(error = %err, "Failed to read page content"),
            },
            None => warn!("Page context requested but no page source is available"),
        }
    }

    if toggles.screenshot {
        flags.push(ContextFlag::Screenshot);
        match sources.screenshot {
            Some(source) => match source.capture_screenshot().await {
                Ok(image) => data.screenshot = Some(image),
                Err(err) => warn!(error = %err, "Failed to capture screenshot"),
            },
            None => warn!("Screenshot requested but no capture source is available"),
        }
    }

    if toggles.element {
        if let Some(element) = element {
            flags.push(ContextFlag::Element);
            data.element = Some(element.clone());
        }
    }

    ContextPayload { flags, data }
}
