#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock Nanoleaf panel for testing
//!
//! Implements the OpenAPI v1 endpoints for pairing, power and color state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock panel state
#[derive(Debug, Clone)]
pub struct MockNanoleafState {
    /// Power button held: a token is issued on request
    pub pairing: bool,
    pub token: String,
    pub on: bool,
    pub hue: u64,
    pub sat: u64,
    pub brightness: u64,
    pub token_requests: usize,
    /// Every state write body, in arrival order
    pub writes: Vec<Value>,
}

impl Default for MockNanoleafState {
    fn default() -> Self {
        Self {
            pairing: true,
            token: "mock-token-abcdef".to_string(),
            on: false,
            hue: 0,
            sat: 0,
            brightness: 100,
            token_requests: 0,
            writes: Vec::new(),
        }
    }
}

type Shared = Arc<RwLock<MockNanoleafState>>;

/// Mock Nanoleaf panel
pub struct MockNanoleaf {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockNanoleaf {
    /// Start a mock panel on a random port
    pub async fn start() -> Self {
        Self::start_with_state(MockNanoleafState::default()).await
    }

    /// Start with custom initial state
    pub async fn start_with_state(initial_state: MockNanoleafState) -> Self {
        let state = Arc::new(RwLock::new(initial_state));

        let app = Router::new()
            .route("/api/v1/", get(handle_root))
            .route("/api/v1/new", post(handle_new_token))
            .route("/api/v1/{token}/state", get(handle_state))
            .route("/api/v1/{token}/state", put(handle_write))
            .route("/api/v1/{token}/state/on", get(handle_power))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn token(&self) -> String {
        self.state.read().await.token.clone()
    }

    pub async fn set_pairing(&self, pairing: bool) {
        self.state.write().await.pairing = pairing;
    }

    pub async fn set_on(&self, on: bool) {
        self.state.write().await.on = on;
    }

    pub async fn is_on(&self) -> bool {
        self.state.read().await.on
    }

    pub async fn writes(&self) -> Vec<Value> {
        self.state.read().await.writes.clone()
    }

    pub async fn token_requests(&self) -> usize {
        self.state.read().await.token_requests
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn unauthorized() -> Response {
    StatusCode::UNAUTHORIZED.into_response()
}

async fn handle_root() -> Response {
    unauthorized()
}

async fn handle_new_token(State(state): State<Shared>) -> Response {
    let mut s = state.write().await;
    s.token_requests += 1;
    if !s.pairing {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({"auth_token": s.token})).into_response()
}

async fn handle_power(State(state): State<Shared>, Path(token): Path<String>) -> Response {
    let s = state.read().await;
    if token != s.token {
        return unauthorized();
    }
    Json(json!({"value": s.on})).into_response()
}

async fn handle_state(State(state): State<Shared>, Path(token): Path<String>) -> Response {
    let s = state.read().await;
    if token != s.token {
        return unauthorized();
    }
    Json(json!({
        "on": {"value": s.on},
        "brightness": {"value": s.brightness, "max": 100, "min": 0},
        "hue": {"value": s.hue, "max": 360, "min": 0},
        "sat": {"value": s.sat, "max": 100, "min": 0},
        "colorMode": "hs",
    }))
    .into_response()
}

async fn handle_write(
    State(state): State<Shared>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.write().await;
    if token != s.token {
        return unauthorized();
    }

    let value = |key: &str| body.pointer(&format!("/{}/value", key)).cloned();
    if let Some(on) = value("on").and_then(|v| v.as_bool()) {
        s.on = on;
    }
    if let Some(hue) = value("hue").and_then(|v| v.as_u64()) {
        s.hue = hue;
        s.on = true;
    }
    if let Some(sat) = value("sat").and_then(|v| v.as_u64()) {
        s.sat = sat;
    }
    if let Some(brightness) = value("brightness").and_then(|v| v.as_u64()) {
        s.brightness = brightness;
    }

    s.writes.push(body.clone());
    StatusCode::NO_CONTENT.into_response()
}
