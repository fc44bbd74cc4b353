//! In-process stand-in for the grading service

#![allow(dead_code)]

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const PASSWORD: &str = "hunter2";

/// One received upload
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub scenario_id: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub duration_seconds: Option<String>,
}

#[derive(Default)]
pub struct StubState {
    access_token: Mutex<String>,
    refresh_token: Mutex<String>,
    issued: AtomicUsize,
    reject_all: Mutex<bool>,
    refresh_down: Mutex<bool>,
    uploads_down: Mutex<bool>,
    statuses: Mutex<VecDeque<Value>>,
    pub uploads: Mutex<Vec<ReceivedUpload>>,
    pub refresh_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub retry_calls: AtomicUsize,
}

impl StubState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next status response (served in order, then `completed`)
    pub fn push_status(&self, status: Value) {
        self.statuses.lock().unwrap().push_back(status);
    }

    /// Invalidate the current access token; the refresh token stays valid
    pub fn expire_access(&self) {
        *self.access_token.lock().unwrap() = "expired".into();
    }

    /// Invalidate the refresh token too
    pub fn revoke_refresh(&self) {
        *self.refresh_token.lock().unwrap() = "revoked".into();
    }

    /// Answer 401 to every authorized request, even with fresh tokens
    pub fn reject_everything(&self) {
        *self.reject_all.lock().unwrap() = true;
    }

    /// Answer 503 on the token endpoint without touching the tokens
    pub fn take_refresh_offline(&self, offline: bool) {
        *self.refresh_down.lock().unwrap() = offline;
    }

    /// Answer 500 to every upload
    pub fn break_uploads(&self) {
        *self.uploads_down.lock().unwrap() = true;
    }

    fn issue(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{}", n);
        let refresh = format!("refresh-{}", n);
        *self.access_token.lock().unwrap() = access.clone();
        *self.refresh_token.lock().unwrap() = refresh.clone();
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "bearer",
            "expires_in": 1800,
            "refresh_expires_in": 604800,
        })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if *self.reject_all.lock().unwrap() {
            return false;
        }
        let expected = format!("Bearer {}", self.access_token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }
}

/// Serve on an ephemeral port from the current runtime
pub async fn serve(state: Arc<StubState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("stub server");
    });
    format!("http://{}", addr)
}

/// Serve from a background thread, for tests that drive the binary
pub fn serve_in_background(state: Arc<StubState>) -> String {
    let (tx, rx) = std::sync::mpsc::channel::<SocketAddr>();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("stub runtime");
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
            tx.send(listener.local_addr().expect("stub address"))
                .expect("report stub address");
            axum::serve(listener, router(state)).await.expect("stub server");
        });
    });
    format!("http://{}", rx.recv().expect("stub server started"))
}

fn router(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/speaking/scenarios/:scenario_id/submit", post(submit))
        .route("/speaking/submissions/:id/status", get(status))
        .route("/speaking/submissions/:id/retry", post(retry))
        .route("/speaking/submissions/:id", get(result))
        .with_state(state)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn unauthorized() -> Response {
    detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<Arc<StubState>>, Json(body): Json<LoginBody>) -> Response {
    if body.email.is_empty() || body.password != PASSWORD {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    }
    Json(state.issue()).into_response()
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(State(state): State<Arc<StubState>>, Json(body): Json<RefreshBody>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if *state.refresh_down.lock().unwrap() {
        return detail(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
    }
    let current = state.refresh_token.lock().unwrap().clone();
    if body.refresh_token != current {
        return detail(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    // Refresh tokens rotate on every use
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Json(state.issue()).into_response()
}

async fn submit(
    State(state): State<Arc<StubState>>,
    Path(scenario_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    if *state.uploads_down.lock().unwrap() {
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "Storage unavailable");
    }

    let mut upload = ReceivedUpload {
        scenario_id: scenario_id.clone(),
        ..Default::default()
    };
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("audio") => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            Some("duration_seconds") => {
                upload.duration_seconds = field.text().await.ok();
            }
            _ => {}
        }
    }

    if upload.size == 0 {
        return detail(StatusCode::BAD_REQUEST, "Audio file is empty");
    }

    let id = format!("sub-{}", state.uploads.lock().unwrap().len() + 1);
    state.uploads.lock().unwrap().push(upload);

    (
        StatusCode::CREATED,
        Json(json!({
            "submission_id": id,
            "scenario_id": scenario_id,
            "status": "pending",
            "message": "Submission received. Processing will begin shortly.",
        })),
    )
        .into_response()
}

async fn status(
    State(state): State<Arc<StubState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    state.status_calls.fetch_add(1, Ordering::SeqCst);

    let mut next = state
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| json!({"status": "completed", "progress_percent": 100}));
    next["id"] = json!(id);
    Json(next).into_response()
}

async fn result(
    State(state): State<Arc<StubState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    state.result_calls.fetch_add(1, Ordering::SeqCst);

    Json(json!({
        "id": id,
        "scenario_id": "42",
        "duration_seconds": 1,
        "transcript": "Cleared to land runway two seven, Speedbird one two three",
        "scores": {
            "pronunciation": 4, "structure": 5, "vocabulary": 4,
            "fluency": 4, "comprehension": 5, "interaction": 5
        },
        "overall_score": 4.5,
        "ai_feedback": {
            "strengths": ["Correct readback order"],
            "improvements": ["Say 'runway' before the number"],
            "overall": "Clear and mostly standard phraseology.",
        },
        "sample_response": "Runway two seven, cleared to land, Speedbird one two three",
        "status": "completed",
        "xp_earned": 25,
        "created_at": "2026-03-01T09:30:00",
        "processed_at": "2026-03-01T09:30:12Z",
    }))
    .into_response()
}

async fn retry(
    State(state): State<Arc<StubState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let count = state.retry_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if count > 3 {
        return detail(StatusCode::BAD_REQUEST, "Maximum retry attempts reached");
    }

    Json(json!({
        "submission_id": id,
        "status": "pending",
        "retry_count": count,
        "message": "Submission queued for reprocessing",
    }))
    .into_response()
}
