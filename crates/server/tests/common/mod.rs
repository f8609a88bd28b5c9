#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use mend_server::ai::{AiService, ChatModel, CompletionRequest, LlmError};
use mend_server::build_router;
use mend_server::config::{AppState, Config};
use mend_server::mail::{Email, MailError, Notifier};
use mend_server::store::SqliteStore;

pub const SCORE_REPLY: &str = r#"{"empathy":4,"listening":3,"respect":5,"clarity":4,"conflictResolution":3,"summary":"Both stayed calm."}"#;

/// Chat model that answers from a queue, then repeats a fallback.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt);
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Email>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn scripted_ai(model: Arc<ScriptedModel>) -> AiService {
    AiService::new(model, Duration::from_secs(2))
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub mail: Arc<RecordingNotifier>,
}

pub async fn test_app(ai: AiService) -> TestApp {
    let mut config = Config::from_lookup(|_| None);
    config.password_cost = 4;
    config.relay_peer_buffer = 16;

    let store = SqliteStore::in_memory().await.unwrap();
    let mail = Arc::new(RecordingNotifier::default());
    let state = AppState::new(config, Arc::new(store), ai, mail.clone());
    let router = build_router(state.clone());

    TestApp { state, router, mail }
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn patch(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, None).await
    }

    /// Register a user and return its id.
    pub async fn register(&self, name: &str, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/register",
                serde_json::json!({ "name": name, "email": email, "password": "secret" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn start_session(&self, a: &str, b: &str) -> String {
        let (status, body) = self
            .post(
                "/api/session",
                serde_json::json!({ "partnerA": a, "partnerB": b }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "start session failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.state.tasks.wait_idle())
            .await
            .expect("background tasks did not finish");
    }
}
