//! Live Chrome tab as a context source.
//!
//! Attaches to a Chrome started with `--remote-debugging-port` and reads the
//! active tab. CDP calls are blocking, so each one runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::context::{PageSource, ScreenshotSource};
use crate::error::CaptureError;
use crate::extract;
use crate::types::PageSummary;

pub const DEFAULT_DEBUG_URL: &str = "http://127.0.0.1:9222";
pub const SCREENSHOT_QUALITY: u32 = 90;

/// The first tab of an attached browser.
pub struct ChromeTab {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeTab {
    /// Connect to an already running Chrome.
    pub fn attach(debug_url: &str) -> Result<Self, CaptureError> {
        info!("Attaching to Chrome at {debug_url}");
        let browser = Browser::connect(debug_url.to_string())
            .map_err(|e| CaptureError::Browser(e.to_string()))?;

        let tab = {
            let tabs = browser.get_tabs();
            let tabs = tabs
                .lock()
                .map_err(|_| CaptureError::Browser("tab list lock poisoned".to_string()))?;
            tabs.first().cloned().ok_or(CaptureError::NoActiveTab)?
        };
        debug!(url = %tab.get_url(), "Using existing tab");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Start a private Chrome with one blank tab.
    pub fn launch(headless: bool) -> Result<Self, CaptureError> {
        info!(headless, "Launching Chrome");
        let options = LaunchOptions {
            headless,
            idle_browser_timeout: Duration::from_secs(120),
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(|e| CaptureError::Browser(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| CaptureError::Browser(e.to_string()))?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Attach when a debuggable Chrome is running, otherwise launch one.
    pub fn attach_or_launch(debug_url: &str, headless: bool) -> Result<Self, CaptureError> {
        Self::attach(debug_url).or_else(|err| {
            warn!(error = %err, "Could not attach to Chrome");
            Self::launch(headless)
        })
    }

    pub fn navigate(&self, url: &str) -> Result<(), CaptureError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| CaptureError::Browser(e.to_string()))?;
        debug!(url, "Navigated");
        Ok(())
    }

    fn evaluate_string(tab: &Tab, expression: &str) -> Result<String, CaptureError> {
        let result = tab
            .evaluate(expression, false)
            .map_err(|e| CaptureError::PageRead(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }
}

#[async_trait(?Send)]
impl PageSource for ChromeTab {
    async fn page_summary(&self) -> Result<PageSummary, CaptureError> {
        let tab = self.tab.clone();
        let (url, html) = tokio::task::spawn_blocking(move || {
            let url = Self::evaluate_string(&tab, "window.location.href")?;
            let html = Self::evaluate_string(&tab, "document.documentElement.outerHTML")?;
            Ok::<_, CaptureError>((url, html))
        })
        .await??;
        Ok(extract::extract_page(&url, &html))
    }
}

#[async_trait(?Send)]
impl ScreenshotSource for ChromeTab {
    async fn capture_screenshot(&self) -> Result<String, CaptureError> {
        let tab = self.tab.clone();
        let png = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(
                CaptureScreenshotFormatOption::Png,
                Some(SCREENSHOT_QUALITY),
                None,
                true,
            )
            .map_err(|e| CaptureError::Browser(e.to_string()))
        })
        .await??;
        debug!(bytes = png.len(), "Captured screenshot");
        Ok(png_data_url(&png))
    }
}

pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}
