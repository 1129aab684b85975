//! The chat session shared by every view.
//!
//! One [`ChatSession`] owns the transcript, the picked element and the
//! selected model. Views only implement [`RenderSurface`]; all chat and
//! context logic lives here.

use std::cell::{Cell, RefCell};

use tracing::{error, info, warn};

use crate::context::{self, ContextSources, ContextToggles};
use crate::error::StoreError;
use crate::relay::client::RelayClient;
use crate::store::{MAX_PERSISTED_MESSAGES, PersistedState, StateStore};
use crate::types::{ChatMessage, DEFAULT_MODEL, PickedElement, take_chars};

pub const PREVIEW_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
}

/// What a view must be able to show.
pub trait RenderSurface {
    fn show_message(&self, message: &ChatMessage);
    fn show_status(&self, text: &str, kind: StatusKind);
    fn clear_status(&self);
    /// Reflect whether a send is in flight (disable the send control).
    fn set_busy(&self, busy: bool);
    /// `None` hides the preview.
    fn show_element_preview(&self, preview: Option<&str>);
    fn clear_transcript(&self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Empty text, or another send was already in flight.
    Skipped,
    Replied(ChatMessage),
    Failed(ChatMessage),
}

/// Short markup preview of a picked element.
pub fn element_preview(element: &PickedElement) -> String {
    let head = take_chars(&element.outer_html, PREVIEW_MAX_CHARS);
    if head.len() < element.outer_html.len() {
        format!("{head}...")
    } else {
        head.to_string()
    }
}

struct SessionState {
    history: Vec<ChatMessage>,
    selected_element: Option<PickedElement>,
    model: String,
}

/// Clears the in-flight flag however `send` exits.
struct InFlight<'a> {
    flag: &'a Cell<bool>,
    surface: &'a dyn RenderSurface,
}

impl<'a> InFlight<'a> {
    fn begin(flag: &'a Cell<bool>, surface: &'a dyn RenderSurface) -> Self {
        flag.set(true);
        surface.set_busy(true);
        Self { flag, surface }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
        self.surface.set_busy(false);
    }
}

pub struct ChatSession {
    client: RelayClient,
    store: Box<dyn StateStore>,
    surface: Box<dyn RenderSurface>,
    state: RefCell<SessionState>,
    in_flight: Cell<bool>,
}

impl ChatSession {
    pub fn new(
        client: RelayClient,
        store: Box<dyn StateStore>,
        surface: Box<dyn RenderSurface>,
    ) -> Self {
        Self {
            client,
            store,
            surface,
            state: RefCell::new(SessionState {
                history: Vec::new(),
                selected_element: None,
                model: DEFAULT_MODEL.to_string(),
            }),
            in_flight: Cell::new(false),
        }
    }

    /// Load persisted state and replay it onto the surface.
    pub fn restore(&self) -> Result<(), StoreError> {
        let saved = self.store.load()?;
        for message in &saved.chat_history {
            self.surface.show_message(message);
        }
        if let Some(element) = &saved.selected_element {
            self.surface
                .show_element_preview(Some(&element_preview(element)));
        }

        let mut state = self.state.borrow_mut();
        state.history = saved.chat_history;
        state.selected_element = saved.selected_element;
        if let Some(model) = saved.selected_model {
            state.model = model;
        }
        info!(messages = state.history.len(), "Restored session");
        Ok(())
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.state.borrow().history.clone()
    }

    pub fn model(&self) -> String {
        self.state.borrow().model.clone()
    }

    pub fn selected_element(&self) -> Option<PickedElement> {
        self.state.borrow().selected_element.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.get()
    }

    pub fn surface(&self) -> &dyn RenderSurface {
        self.surface.as_ref()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.state.borrow_mut().model = model.into();
        self.persist();
    }

    /// Replace the current element.
    pub fn select_element(&self, element: PickedElement) {
        self.surface
            .show_element_preview(Some(&element_preview(&element)));
        self.surface.show_status("Element selected!", StatusKind::Success);
        self.state.borrow_mut().selected_element = Some(element);
        self.persist();
    }

    pub fn clear_element(&self) {
        self.state.borrow_mut().selected_element = None;
        self.surface.show_element_preview(None);
        self.persist();
    }

    pub fn clear_chat(&self) {
        self.state.borrow_mut().history.clear();
        self.surface.clear_transcript();
        self.surface.show_status("Chat cleared!", StatusKind::Success);
        self.persist();
    }

    /// Run one chat turn. A second call while one is in flight does nothing.
    pub async fn send(
        &self,
        text: &str,
        toggles: ContextToggles,
        sources: ContextSources<'_>,
    ) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() || self.in_flight.get() {
            return SendOutcome::Skipped;
        }
        let _in_flight = InFlight::begin(&self.in_flight, self.surface.as_ref());

        let element = self.selected_element();
        let payload = context::assemble(toggles, sources, element.as_ref()).await;

        let (prior, model) = {
            let state = self.state.borrow();
            (state.history.clone(), state.model.clone())
        };
        self.append(ChatMessage::user(text, payload.flags.clone()));

        let outcome = match self.client.chat(text, &model, &payload.data, &prior).await {
            Ok(reply) => {
                let message = ChatMessage::assistant(reply.response);
                self.append(message.clone());
                SendOutcome::Replied(message)
            }
            Err(err) => {
                error!(error = %err, "Chat turn failed");
                let message =
                    ChatMessage::error(format!("Error: {err}. Make sure the server is running."));
                self.append(message.clone());
                SendOutcome::Failed(message)
            }
        };

        self.persist();
        outcome
    }

    /// Keeps no more than is persisted.
    fn append(&self, message: ChatMessage) {
        self.surface.show_message(&message);
        let mut state = self.state.borrow_mut();
        let history = &mut state.history;
        history.push(message);
        let excess = history.len().saturating_sub(MAX_PERSISTED_MESSAGES);
        history.drain(..excess);
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.state.borrow();
            PersistedState::snapshot(
                &state.history,
                Some(state.model.clone()),
                state.selected_element.clone(),
            )
        };
        if let Err(err) = self.store.save(&snapshot) {
            warn!(error = %err, "Failed to save session state");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{ContextFlag, Role};
    use serde_json::json;
    use std::rc::Rc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SurfaceEvent {
        Message(String),
        Status(String),
        ClearStatus,
        Busy(bool),
        Preview(Option<String>),
        ClearTranscript,
    }

    /// Records every call so tests can assert on what a view would show.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) events: Rc<RefCell<Vec<SurfaceEvent>>>,
    }

    impl RecordingSurface {
        pub(crate) fn events(&self) -> Vec<SurfaceEvent> {
            self.events.borrow().clone()
        }
    }

    impl RenderSurface for RecordingSurface {
        fn show_message(&self, message: &ChatMessage) {
            self.events
                .borrow_mut()
                .push(SurfaceEvent::Message(message.content.clone()));
        }

        fn show_status(&self, text: &str, _kind: StatusKind) {
            self.events
                .borrow_mut()
                .push(SurfaceEvent::Status(text.to_string()));
        }

        fn clear_status(&self) {
            self.events.borrow_mut().push(SurfaceEvent::ClearStatus);
        }

        fn set_busy(&self, busy: bool) {
            self.events.borrow_mut().push(SurfaceEvent::Busy(busy));
        }

        fn show_element_preview(&self, preview: Option<&str>) {
            self.events
                .borrow_mut()
                .push(SurfaceEvent::Preview(preview.map(str::to_string)));
        }

        fn clear_transcript(&self) {
            self.events.borrow_mut().push(SurfaceEvent::ClearTranscript);
        }
    }

    pub(crate) fn session(server_url: &str) -> (ChatSession, RecordingSurface) {
        let surface = RecordingSurface::default();
        let session = ChatSession::new(
            RelayClient::new(server_url),
            Box::new(MemoryStore::default()),
            Box::new(surface.clone()),
        );
        (session, surface)
    }

    async fn reply_server(delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "It is a test page.", "model": "m" }))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_send_appends_user_and_reply() {
        let server = reply_server(Duration::ZERO).await;
        let (session, surface) = session(&server.uri());
        session.select_element(PickedElement {
            tag_name: "h1".to_string(),
            outer_html: "<h1>Hi</h1>".to_string(),
            ..Default::default()
        });

        let toggles = ContextToggles {
            element: true,
            ..Default::default()
        };
        let outcome = session
            .send("  what is this?  ", toggles, ContextSources::default())
            .await;

        assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.content == "It is a test page."));
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "what is this?");
        assert_eq!(history[0].context, Some(vec![ContextFlag::Element]));
        assert_eq!(history[1].role, Role::Assistant);
        assert!(!session.is_sending());

        let events = surface.events();
        assert!(events.contains(&SurfaceEvent::Busy(true)));
        assert_eq!(events.last(), Some(&SurfaceEvent::Busy(false)));
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped() {
        let (session, surface) = session("http://127.0.0.1:9");
        let outcome = session
            .send("   ", ContextToggles::default(), ContextSources::default())
            .await;
        assert_eq!(outcome, SendOutcome::Skipped);
        assert!(surface.events().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_message() {
        let (session, surface) = session("http://127.0.0.1:9");
        let outcome = session
            .send("hello", ContextToggles::default(), ContextSources::default())
            .await;

        let SendOutcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert!(message.is_error);
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.starts_with("Error: "));
        assert!(message.content.ends_with("Make sure the server is running."));
        assert!(!session.is_sending());
        assert_eq!(surface.events().last(), Some(&SurfaceEvent::Busy(false)));
    }

    #[tokio::test]
    async fn test_status_failure_carries_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (session, _) = session(&server.uri());

        let outcome = session
            .send("hello", ContextToggles::default(), ContextSources::default())
            .await;
        let SendOutcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(
            message.content,
            "Error: Server error: 500. Make sure the server is running."
        );
    }

    #[tokio::test]
    async fn test_second_send_while_in_flight_is_noop() {
        let server = reply_server(Duration::from_millis(200)).await;
        let (session, _) = session(&server.uri());

        let (first, second) = tokio::join!(
            session.send("one", ContextToggles::default(), ContextSources::default()),
            session.send("two", ContextToggles::default(), ContextSources::default()),
        );

        assert!(matches!(first, SendOutcome::Replied(_)));
        assert_eq!(second, SendOutcome::Skipped);
        assert_eq!(session.history().len(), 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prior_turns_exclude_current_message() {
        let server = reply_server(Duration::ZERO).await;
        let (session, _) = session(&server.uri());
        session
            .send("first", ContextToggles::default(), ContextSources::default())
            .await;
        session
            .send("second", ContextToggles::default(), ContextSources::default())
            .await;

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["message"], "second");
        assert_eq!(
            body["history"],
            json!([
                { "role": "user", "content": "first" },
                { "role": "assistant", "content": "It is a test page." }
            ])
        );
    }

    #[tokio::test]
    async fn test_history_is_capped_like_storage() {
        let server = reply_server(Duration::ZERO).await;
        let store = MemoryStore::default();
        let earlier: Vec<ChatMessage> = (0..MAX_PERSISTED_MESSAGES)
            .map(|i| ChatMessage::assistant(format!("old {i}")))
            .collect();
        store
            .save(&PersistedState::snapshot(&earlier, None, None))
            .unwrap();
        let session = ChatSession::new(
            RelayClient::new(server.uri()),
            Box::new(store),
            Box::new(RecordingSurface::default()),
        );
        session.restore().unwrap();

        session
            .send("one more", ContextToggles::default(), ContextSources::default())
            .await;

        let history = session.history();
        assert_eq!(history.len(), MAX_PERSISTED_MESSAGES);
        assert_eq!(history[0].content, "old 2");
        assert_eq!(history[MAX_PERSISTED_MESSAGES - 1].content, "It is a test page.");
    }

    #[test]
    fn test_element_preview_truncates() {
        let element = PickedElement {
            outer_html: format!("<p>{}</p>", "x".repeat(300)),
            ..Default::default()
        };
        let preview = element_preview(&element);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS + 3);

        let short = PickedElement {
            outer_html: "<br>".to_string(),
            ..Default::default()
        };
        assert_eq!(element_preview(&short), "<br>");
    }

    #[test]
    fn test_element_and_chat_management() {
        let (session, surface) = session("http://127.0.0.1:9");
        session.select_element(PickedElement::default());
        assert!(session.selected_element().is_some());

        session.clear_element();
        assert!(session.selected_element().is_none());

        session.clear_chat();
        let events = surface.events();
        assert!(events.contains(&SurfaceEvent::Preview(None)));
        assert!(events.contains(&SurfaceEvent::ClearTranscript));
        assert!(events.contains(&SurfaceEvent::Status("Chat cleared!".to_string())));
    }

    #[test]
    fn test_restore_replays_persisted_state() {
        let store = MemoryStore::default();
        let saved = PersistedState::snapshot(
            &[ChatMessage::user("q", vec![]), ChatMessage::assistant("a")],
            Some("llama-3.1-8b-instant".to_string()),
            Some(PickedElement {
                outer_html: "<em>x</em>".to_string(),
                ..Default::default()
            }),
        );
        store.save(&saved).unwrap();

        let surface = RecordingSurface::default();
        let session = ChatSession::new(
            RelayClient::new("http://127.0.0.1:9"),
            Box::new(store),
            Box::new(surface.clone()),
        );
        session.restore().unwrap();

        assert_eq!(session.history(), saved.chat_history);
        assert_eq!(session.model(), "llama-3.1-8b-instant");
        assert_eq!(
            surface.events(),
            vec![
                SurfaceEvent::Message("q".to_string()),
                SurfaceEvent::Message("a".to_string()),
                SurfaceEvent::Preview(Some("<em>x</em>".to_string())),
            ]
        );
    }
}
