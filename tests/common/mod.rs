#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use herald::app::auth::TokenVerifier;
use herald::app::notifications::NotificationService;
use herald::domain::notification::{NewNotification, NotificationType, ResourceType};
use herald::infra::bus::LocalBus;
use herald::infra::memory::{MemoryNotificationStore, MemoryUnreadCache};
use herald::realtime::{ConnectionRegistry, StreamGateway};
use herald::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// "0123456789abcdef0123456789abcdef" (32 bytes), test-only
const TEST_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
pub const TEST_ADMIN_TOKEN: &str = "test-admin-token-12345";
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// TestApp: fresh in-memory backends per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: MemoryNotificationStore,
    pub cache: MemoryUnreadCache,
    pub bus: LocalBus,
    pub registry: Arc<ConnectionRegistry>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub access_token: String,
}

pub async fn app() -> TestApp {
    TestApp::setup(Duration::from_secs(30)).await
}

/// App whose streams send keep-alives every `interval`.
pub async fn app_with_keepalive(interval: Duration) -> TestApp {
    TestApp::setup(interval).await
}

impl TestApp {
    async fn setup(keepalive: Duration) -> Self {
        let store = MemoryNotificationStore::new();
        let cache = MemoryUnreadCache::new();
        let bus = LocalBus::default();
        let registry = Arc::new(ConnectionRegistry::new());

        let notifications = NotificationService::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            Arc::new(bus.clone()),
        );
        let gateway = StreamGateway::new(Arc::new(bus.clone()), registry.clone())
            .with_keepalive_interval(keepalive);

        let state = AppState {
            notifications,
            gateway,
            store: Arc::new(store.clone()),
            bus: Arc::new(bus.clone()),
            tokens: TokenVerifier::new(TEST_ACCESS_KEY),
            admin_token: Some(TEST_ADMIN_TOKEN.to_string()),
        };

        let router = herald::http::router(state.clone());

        TestApp {
            router,
            state,
            store,
            cache,
            bus,
            registry,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let response = self.send(method, path, body, headers).await;

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed")
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::GET, path, None, &headers).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::DELETE, path, None, &headers).await
    }

    /// POST with an admin token in the x-admin-token header.
    pub async fn post_admin(
        &self,
        path: &str,
        body: Value,
        admin_token: Option<&str>,
    ) -> TestResponse {
        let mut headers = vec![];
        if let Some(t) = admin_token {
            headers.push(("x-admin-token", t));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    /// Opens `GET /notifications/stream` with the token in the query string.
    pub async fn open_stream(&self, token: &str) -> (StatusCode, SseClient) {
        let path = format!("/notifications/stream?token={}", token);
        self.open_stream_with(&path, &[]).await
    }

    pub async fn open_stream_with(
        &self,
        path: &str,
        headers: &[(&str, &str)],
    ) -> (StatusCode, SseClient) {
        let response = self.send(Method::GET, path, None, headers).await;
        let status = response.status();
        (
            status,
            SseClient {
                body: response.into_body(),
                buffer: String::new(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// A fresh identity with a valid access token.
    pub fn create_user(&self) -> TestUser {
        let id = Uuid::new_v4();
        let (access_token, _) = self
            .state
            .tokens
            .issue_access_token(id, 15)
            .expect("issue_access_token failed");
        TestUser { id, access_token }
    }

    /// Ingests events through the admin endpoint, returning the response.
    pub async fn ingest(&self, events: Vec<Value>) -> TestResponse {
        self.post_admin(
            "/admin/notifications",
            json!({ "events": events }),
            Some(TEST_ADMIN_TOKEN),
        )
        .await
    }

    pub fn admin_token(&self) -> &str {
        TEST_ADMIN_TOKEN
    }
}

/// JSON body of a producer event for `recipient` in `scope`.
pub fn event_json(recipient: Uuid, scope: Uuid) -> Value {
    json!({
        "type": "TASK_ASSIGNED",
        "actorId": Uuid::new_v4(),
        "targetUserId": recipient,
        "scopeId": scope,
        "resourceType": "task",
        "resourceId": Uuid::new_v4(),
        "resourceName": "Write release notes",
        "metadata": { "priority": "high", "board": { "name": "Launch" } }
    })
}

pub fn new_event(recipient: Uuid, scope: Uuid) -> NewNotification {
    NewNotification {
        notification_type: NotificationType::TaskAssigned,
        actor_id: Uuid::new_v4(),
        target_user_id: recipient,
        scope_id: scope,
        resource_type: ResourceType::Task,
        resource_id: Uuid::new_v4(),
        resource_name: Some("Write release notes".into()),
        metadata: Default::default(),
        occurred_at: None,
    }
}

// ---------------------------------------------------------------------------
// SSE client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
    pub comment: Option<String>,
}

impl SseMessage {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or(Value::Null)
    }
}

/// Reads server-sent events incrementally from a response body.
pub struct SseClient {
    body: Body,
    buffer: String,
}

impl SseClient {
    /// Next event or comment. Panics if nothing arrives in time.
    pub async fn next_message(&mut self) -> SseMessage {
        self.try_next_message(EVENT_TIMEOUT)
            .await
            .expect("timed out waiting for an event")
    }

    /// Next non-comment event. Panics if nothing arrives in time.
    pub async fn next_event(&mut self) -> SseMessage {
        loop {
            let message = self.next_message().await;
            if message.comment.is_none() {
                return message;
            }
        }
    }

    /// `None` if no complete message arrives within `wait` or the stream ends.
    pub async fn try_next_message(&mut self, wait: Duration) -> Option<SseMessage> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(message) = self.take_buffered() {
                return Some(message);
            }
            let frame = tokio::time::timeout_at(deadline, self.body.frame()).await.ok()??;
            let frame = frame.expect("stream body error");
            if let Ok(data) = frame.into_data() {
                self.buffer
                    .push_str(std::str::from_utf8(&data).expect("non-utf8 event data"));
            }
        }
    }

    /// True when no event (comments ignored) arrives within `wait`.
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.try_next_message(remaining).await {
                None => return true,
                Some(message) if message.comment.is_some() => continue,
                Some(_) => return false,
            }
        }
    }

    /// Whether the server has finished the body.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(EVENT_TIMEOUT, self.body.frame()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    fn take_buffered(&mut self) -> Option<SseMessage> {
        let end = self.buffer.find("\n\n")?;
        let raw: String = self.buffer.drain(..end + 2).collect();

        let mut message = SseMessage {
            event: None,
            data: String::new(),
            comment: None,
        };
        for line in raw.lines() {
            if let Some(comment) = line.strip_prefix(':') {
                message.comment = Some(comment.trim().to_string());
            } else if let Some(event) = line.strip_prefix("event:") {
                message.event = Some(event.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                if !message.data.is_empty() {
                    message.data.push('\n');
                }
                message.data.push_str(data.trim_start());
            }
        }
        Some(message)
    }
}
