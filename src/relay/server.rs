use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::error::RelayError;
use crate::relay::prompt::build_messages;
use crate::relay::upstream::{CompletionApi, CompletionRequest};
use crate::types::{ContextData, DEFAULT_MODEL, ModelInfo, Usage};

/// Screenshots arrive inline as base64, so the body limit is generous.
pub const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

pub struct AppState {
    pub upstream: Arc<dyn CompletionApi>,
    /// Include error detail in 500 responses.
    pub development: bool,
}

/// A chat body, read field by field so one bad part never rejects the rest.
#[derive(Debug, Default)]
pub struct ChatRequest {
    /// `None` unless the body carries a string.
    pub message: Option<String>,
    pub model: Option<String>,
    pub context: ContextData,
    /// Validated entry by entry; anything that is not an array is ignored.
    pub history: Option<Value>,
}

impl ChatRequest {
    /// Parse a raw body. Content type is not checked; an empty body reads as `{}`.
    pub fn from_body(body: &[u8]) -> Result<Self, RelayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::InvalidBody(err.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(RelayError::InvalidBody(
                "expected a JSON object".to_string(),
            ));
        };

        let string = |key: &str| fields.get(key).and_then(Value::as_str).map(String::from);
        let context = match fields.get("context") {
            Some(context @ Value::Object(_)) => ContextData {
                page_content: context_part(context, "pageContent"),
                screenshot: context_part(context, "screenshot"),
                element: context_part(context, "element"),
            },
            _ => ContextData::default(),
        };

        Ok(Self {
            message: string("message"),
            model: string("model"),
            context,
            history: fields.get("history").cloned(),
        })
    }
}

/// One context part; an unreadable part is dropped and the turn goes on.
fn context_part<T: DeserializeOwned>(context: &Value, key: &str) -> Option<T> {
    let raw = context.get(key).filter(|v| !v.is_null())?;
    serde_json::from_value(raw.clone())
        .map_err(|err| warn!(part = key, error = %err, "Dropping unreadable context part"))
        .ok()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub usage: Option<Usage>,
}

/// A [`RelayError`] rendered as an HTTP response.
pub struct ApiError {
    error: RelayError,
    development: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            RelayError::MissingMessage | RelayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": self.error.to_string() });
        if self.development && status == StatusCode::INTERNAL_SERVER_ERROR {
            body["details"] = Value::String(format!("{:?}", self.error));
        }
        (status, Json(body)).into_response()
    }
}

pub fn available_models() -> Vec<ModelInfo> {
    [
        ("llama-3.3-70b-versatile", "Llama 3.3 70B", false),
        ("llama-3.1-8b-instant", "Llama 3.1 8B (Fast)", false),
        (
            "meta-llama/llama-4-scout-17b-16e-instruct",
            "Llama 4 17B",
            true,
        ),
        ("mixtral-8x7b-32768", "Mixtral 8x7B", false),
    ]
    .into_iter()
    .map(|(id, name, vision)| ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        vision,
    })
    .collect()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/models", get(models_handler))
        .route("/api/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Relay server running on http://{addr}");
        info!("Health check: http://{addr}/health");
    }
    axum::serve(listener, router(state)).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

async fn models_handler() -> Json<Value> {
    Json(json!({ "models": available_models() }))
}

fn log_context(context: &ContextData) {
    if let Some(page) = &context.page_content {
        debug!(
            url = %page.url,
            title = %page.title,
            headings = page.headings.len(),
            content_chars = page.main_content.chars().count(),
            "Page content attached"
        );
        trace!(html = %page.html, "Page HTML");
    }
    if let Some(screenshot) = &context.screenshot {
        debug!(length = screenshot.len(), "Screenshot attached");
    }
    if let Some(element) = &context.element {
        debug!(
            tag = %element.tag_name,
            id = %element.id,
            classes = %element.class_name,
            html_chars = element.outer_html.len(),
            "Selected element attached"
        );
    }
    if context.is_empty() {
        debug!("No context attached");
    }
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ApiError> {
    let fail = |error: RelayError| ApiError {
        error,
        development: state.development,
    };

    let request = ChatRequest::from_body(&body).map_err(|err| {
        debug!(error = %err, "Rejected chat body");
        fail(err)
    })?;

    let Some(message) = request.message.as_deref().filter(|m| !m.is_empty()) else {
        return Err(fail(RelayError::MissingMessage));
    };
    let model = request
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL);
    let context = request.context;
    let history = match &request.history {
        Some(Value::Array(entries)) => entries.as_slice(),
        _ => &[],
    };

    info!(model, prompt = %message, "Incoming chat request");
    log_context(&context);

    let messages = build_messages(message, model, &context, history);
    let completion = state
        .upstream
        .complete(&CompletionRequest::new(model, messages))
        .await
        .map_err(|err| {
            error!(error = %err, "Chat error");
            fail(RelayError::from(err))
        })?;

    match &completion.usage {
        Some(usage) => info!(
            total = usage.total_tokens,
            prompt = usage.prompt_tokens,
            completion = usage.completion_tokens,
            "Model replied"
        ),
        None => info!("Model replied without usage accounting"),
    }

    Ok(Json(ChatResponse {
        response: completion.content,
        model: model.to_string(),
        usage: completion.usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::relay::upstream::{Completion, MessageContent};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubUpstream {
        calls: AtomicUsize,
        last: Mutex<Option<CompletionRequest>>,
        fail_with: Option<fn() -> UpstreamError>,
    }

    #[async_trait]
    impl CompletionApi for StubUpstream {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<Completion, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            if let Some(make_error) = self.fail_with {
                return Err(make_error());
            }
            Ok(Completion {
                content: "stub reply".to_string(),
                usage: Some(Usage {
                    total_tokens: 3,
                    prompt_tokens: 2,
                    completion_tokens: 1,
                }),
            })
        }
    }

    fn app(upstream: Arc<StubUpstream>, development: bool) -> Router {
        router(Arc::new(AppState {
            upstream,
            development,
        }))
    }

    async fn post_chat(app: Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_message_is_rejected_before_upstream() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_chat(app(upstream.clone(), false), json!({ "model": "m" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    async fn post_raw(app: Router, body: &'static str, content_type: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method("POST").uri("/api/chat");
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        let response = app
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_null_description_still_answers() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_chat(
            app(upstream.clone(), false),
            json!({
                "message": "what is this page?",
                "context": {
                    "pageContent": {
                        "url": "https://a.test/",
                        "title": "A",
                        "description": null,
                        "headings": [],
                        "mainContent": "hello",
                        "links": [],
                        "html": "<html></html>"
                    }
                }
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "stub reply");
        let sent = upstream.last.lock().unwrap().clone().unwrap();
        let MessageContent::Text(system) = &sent.messages[0].content else {
            panic!("system prompt should be text");
        };
        assert!(system.contains("- Description: N/A"));
    }

    #[tokio::test]
    async fn test_unreadable_context_part_is_dropped() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, _) = post_chat(
            app(upstream.clone(), false),
            json!({
                "message": "hi",
                "context": { "pageContent": "not an object", "screenshot": "data:image/png;base64,AA" }
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_string_message_is_missing() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_chat(app(upstream.clone(), false), json!({ "message": 42 })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_without_content_type_is_read() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_raw(app(upstream.clone(), false), r#"{"model":"m"}"#, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");

        let (status, body) = post_raw(app(upstream.clone(), false), r#"{"message":"hi"}"#, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "stub reply");
    }

    #[tokio::test]
    async fn test_malformed_body_gets_json_error() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) =
            post_raw(app(upstream.clone(), false), "{not json", Some("application/json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

        let (status, body) =
            post_raw(app(upstream.clone(), false), "[1, 2]", Some("application/json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, _) = post_chat(app(upstream.clone(), false), json!({ "message": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_success_echoes_default_model() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_chat(
            app(upstream.clone(), false),
            json!({
                "message": "summarize",
                "history": [{ "role": "user", "content": "earlier" }, { "bogus": true }]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "stub reply");
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["usage"]["total_tokens"], 3);

        let sent = upstream.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.model, DEFAULT_MODEL);
        assert_eq!(sent.max_tokens, 2048);
        assert_eq!(sent.messages.len(), 3);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vision_request_forwards_image() {
        let upstream = Arc::new(StubUpstream::default());
        let (status, body) = post_chat(
            app(upstream.clone(), false),
            json!({
                "message": "what is on screen?",
                "model": "meta-llama/llama-4-scout-17b-16e-instruct",
                "context": { "screenshot": "data:image/png;base64,AAAA" }
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "meta-llama/llama-4-scout-17b-16e-instruct");
        let sent = upstream.last.lock().unwrap().clone().unwrap();
        assert!(matches!(
            &sent.messages.last().unwrap().content,
            MessageContent::Parts(parts) if parts.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_status() {
        let cases: [(fn() -> UpstreamError, StatusCode); 3] = [
            (|| UpstreamError::MissingApiKey, StatusCode::UNAUTHORIZED),
            (
                || UpstreamError::RateLimited("slow".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                || UpstreamError::Api {
                    status: 500,
                    message: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (make_error, expected) in cases {
            let upstream = Arc::new(StubUpstream {
                fail_with: Some(make_error),
                ..Default::default()
            });
            let (status, body) = post_chat(app(upstream, false), json!({ "message": "hi" })).await;
            assert_eq!(status, expected);
            assert!(body.get("details").is_none());
        }
    }

    #[tokio::test]
    async fn test_development_mode_adds_details() {
        let upstream = Arc::new(StubUpstream {
            fail_with: Some(|| UpstreamError::Api {
                status: 502,
                message: "bad gateway".into(),
            }),
            ..Default::default()
        });
        let (status, body) = post_chat(app(upstream, true), json!({ "message": "hi" })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Upstream API error (502): bad gateway");
        assert!(body["details"].as_str().unwrap().contains("Api"));
    }

    #[tokio::test]
    async fn test_models_and_health() {
        let upstream = Arc::new(StubUpstream::default());
        let response = app(upstream.clone(), false)
            .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let models = body["models"].as_array().unwrap();
        assert_eq!(models.len(), 4);
        assert_eq!(
            models.iter().filter(|m| m["vision"] == true).count(),
            1
        );

        let response = app(upstream, false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
