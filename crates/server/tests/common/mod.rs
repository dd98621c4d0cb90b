//! Shared helpers for the HTTP-level integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use diligence_core::llm::LlmError;
use diligence_core::{AnswerGenerator, ExtractiveGenerator, GeneratedAnswer, Question, RetrievedChunk};
use diligence_db::Database;
use diligence_server::jobs::JobSettings;
use diligence_server::{create_app, AppState};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower::ServiceExt;

pub const AUDITOR_DOC: &str = "Fund IV Operations Overview.\n\n\
    The auditor of the fund is Deloitte LLP, appointed in 2019.\n\n\
    The fund administrator is Apex Group, which calculates the monthly NAV.\n\n\
    The custodian of the fund is State Street.";

/// Blocks each answer until the test adds a permit, then answers
/// extractively.
pub struct SteppedGenerator {
    pub permits: Arc<Semaphore>,
    inner: ExtractiveGenerator,
}

impl SteppedGenerator {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            inner: ExtractiveGenerator::new(),
        }
    }
}

#[async_trait]
impl AnswerGenerator for SteppedGenerator {
    async fn generate(
        &self,
        question: &Question,
        context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| LlmError::NotAvailable(e.to_string()))?;
        permit.forget();
        self.inner.generate(question, context).await
    }

    fn name(&self) -> &str {
        "stepped"
    }
}

/// Panics on every call.
pub struct PanickingGenerator;

#[async_trait]
impl AnswerGenerator for PanickingGenerator {
    async fn generate(
        &self,
        _question: &Question,
        _context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        panic!("answer backend crashed")
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Answers extractively until `fail_from` calls have been made, then errors.
pub struct FailingGenerator {
    calls: AtomicUsize,
    fail_from: usize,
    inner: ExtractiveGenerator,
}

impl FailingGenerator {
    pub fn new(fail_from: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from,
            inner: ExtractiveGenerator::new(),
        }
    }
}

#[async_trait]
impl AnswerGenerator for FailingGenerator {
    async fn generate(
        &self,
        question: &Question,
        context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_from {
            return Err(LlmError::Api {
                status: 503,
                message: "model overloaded".into(),
            });
        }
        self.inner.generate(question, context).await
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Never answers.
pub struct StalledGenerator;

#[async_trait]
impl AnswerGenerator for StalledGenerator {
    async fn generate(
        &self,
        _question: &Question,
        _context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub app: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_generator(Arc::new(ExtractiveGenerator::new())).await
    }

    pub async fn with_generator(generator: Arc<dyn AnswerGenerator>) -> Self {
        let db = Database::new_in_memory().await.expect("in-memory DB for tests");
        Self::with_db(db, JobSettings::default(), generator).await
    }

    pub async fn with_db(
        db: Database,
        settings: JobSettings,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let state = AppState::with_options(db, settings, generator)
            .await
            .expect("app state");
        let app = create_app(Arc::clone(&state));
        Self { state, app }
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Submit a job and return its request id, asserting it was accepted.
    pub async fn submit(&self, kind: &str, target: Option<&str>, payload: Value) -> String {
        let (status, body) = self
            .post(
                "/jobs",
                json!({"kind": kind, "target_project_id": target, "payload": payload}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "submit {kind}: {body}");
        body["request_id"].as_str().unwrap().to_string()
    }

    pub async fn job(&self, id: &str) -> Value {
        let (status, body) = self.get(&format!("/jobs/{id}")).await;
        assert_eq!(status, StatusCode::OK, "job {id}: {body}");
        body
    }

    /// Poll a job until it is terminal.
    pub async fn wait_terminal(&self, id: &str) -> Value {
        for _ in 0..500 {
            let view = self.job(id).await;
            if view["status"] == "completed" || view["status"] == "failed" {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    pub async fn project(&self, id: &str) -> Value {
        let (status, body) = self.get(&format!("/projects/{id}")).await;
        assert_eq!(status, StatusCode::OK, "project {id}: {body}");
        body
    }

    /// Create a project directly with the given question texts.
    pub async fn create_project(&self, scope: &str, questions: &[&str]) -> String {
        let questions: Vec<Value> = questions.iter().map(|q| json!({"text": q})).collect();
        let (status, body) = self
            .post(
                "/projects",
                json!({"name": "Fund IV", "scope": scope, "questions": questions}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create project: {body}");
        body["project_id"].as_str().unwrap().to_string()
    }

    /// Index one inline document into the project and wait for it.
    pub async fn index(&self, project_id: &str, filename: &str, content: &str) -> Value {
        let id = self
            .submit(
                "index_document",
                Some(project_id),
                json!({"filename": filename, "content": content}),
            )
            .await;
        let view = self.wait_terminal(&id).await;
        assert_eq!(view["status"], "completed", "{view}");
        view
    }
}

/// Poll until `check` passes on the project view.
pub async fn wait_for_project(app: &TestApp, project_id: &str, check: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..500 {
        let project = app.project(project_id).await;
        if check(&project) {
            return project;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("project {project_id} never reached the expected state");
}

/// Incremental reader for an SSE response body.
pub struct SseReader {
    body: axum::body::BodyDataStream,
    buffer: String,
}

impl SseReader {
    pub fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            buffer: String::new(),
        }
    }

    /// The next event's `(name, data)`, or `None` once the stream ends.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        use futures_util::StreamExt;
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let mut name = String::from("message");
                let mut data = None;
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data = serde_json::from_str(v.trim()).ok();
                    }
                }
                match data {
                    Some(data) => return Some((name, data)),
                    // Keep-alive comment.
                    None => continue,
                }
            }
            let chunk = tokio::time::timeout(Duration::from_secs(10), self.body.next())
                .await
                .expect("SSE event within 10s")?
                .expect("SSE body chunk");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}
