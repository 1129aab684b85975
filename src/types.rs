use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Bounded summary of the page the user is viewing.
///
/// Every field defaults, and `null` reads as the default, so a relay accepts
/// partial summaries (a page without a description sends `null`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageSummary {
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub headings: Vec<Heading>,
    #[serde(deserialize_with = "null_as_default")]
    pub main_content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub links: Vec<Link>,
    #[serde(deserialize_with = "null_as_default")]
    pub html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heading {
    #[serde(deserialize_with = "null_as_default")]
    pub level: u8,
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(deserialize_with = "null_as_default")]
    pub href: String,
}

/// Structural snapshot of the element chosen with the picker.
///
/// Text and markup are kept whole; only attribute values are capped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PickedElement {
    #[serde(deserialize_with = "null_as_default")]
    pub tag_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub class_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub text_content: String,
    #[serde(rename = "outerHTML", deserialize_with = "null_as_default")]
    pub outer_html: String,
    #[serde(deserialize_with = "null_as_default")]
    pub attributes: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub computed_styles: ComputedStyles,
}

/// The fixed subset of computed style properties captured with a pick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedStyles {
    #[serde(deserialize_with = "null_as_default")]
    pub display: String,
    #[serde(deserialize_with = "null_as_default")]
    pub position: String,
    #[serde(deserialize_with = "null_as_default")]
    pub width: String,
    #[serde(deserialize_with = "null_as_default")]
    pub height: String,
    #[serde(deserialize_with = "null_as_default")]
    pub color: String,
    #[serde(deserialize_with = "null_as_default")]
    pub background_color: String,
    #[serde(deserialize_with = "null_as_default")]
    pub font_size: String,
    #[serde(deserialize_with = "null_as_default")]
    pub font_family: String,
}

/// One of the three context toggles a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFlag {
    Page,
    Screenshot,
    Element,
}

impl ContextFlag {
    /// Short label used when rendering a message's context tags.
    pub fn label(self) -> &'static str {
        match self {
            ContextFlag::Page => "Page",
            ContextFlag::Screenshot => "Screenshot",
            ContextFlag::Element => "Element",
        }
    }
}

/// Context data forwarded to the relay as the request's `context` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_content: Option<PageSummary>,
    /// Base64 PNG or a full `data:` URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<PickedElement>,
}

impl ContextData {
    pub fn is_empty(&self) -> bool {
        self.page_content.is_none() && self.screenshot.is_none() && self.element.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub flags: Vec<ContextFlag>,
    pub data: ContextData,
}

impl ContextPayload {
    /// Every present data key has its flag listed.
    ///
    /// A flag without data is allowed: it records a toggle whose capture failed.
    pub fn is_consistent(&self) -> bool {
        let listed = |flag| self.flags.contains(&flag);
        (self.data.page_content.is_none() || listed(ContextFlag::Page))
            && (self.data.screenshot.is_none() || listed(ContextFlag::Screenshot))
            && (self.data.element.is_none() || listed(ContextFlag::Element))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ContextFlag>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, context: Vec<ContextFlag>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            context: Some(context),
            is_error: false,
            timestamp: now_millis(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            context: None,
            is_error: false,
            timestamp: now_millis(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }
}

/// A prior turn as forwarded to the relay: role and content only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for HistoryTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub vision: bool,
}

/// Token accounting reported by the upstream completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Reads `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// First `max` characters of `text`, counted in chars rather than bytes.
pub fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
