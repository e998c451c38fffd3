#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock Philips Hue bridge for testing
//!
//! Implements the v1 REST endpoints the session uses: config, registration,
//! full state, light list and per-light state writes.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock bridge state
#[derive(Debug, Clone)]
pub struct MockHueState {
    /// Registration succeeds only while the link button is "pressed"
    pub link_button: bool,
    pub username: String,
    pub group_name: String,
    pub group_lights: Vec<String>,
    pub lights: BTreeMap<String, Value>,
    /// Inline error entries returned instead of the full state
    pub inline_error: Option<Value>,
    pub registrations: usize,
    /// Every state write, in arrival order
    pub writes: Vec<(String, Value)>,
}

impl Default for MockHueState {
    fn default() -> Self {
        let lights = ["1", "2"]
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    json!({"state": {"on": false, "hue": 0, "sat": 0, "bri": 0}, "name": format!("Lamp {}", id)}),
                )
            })
            .collect();
        Self {
            link_button: true,
            username: "mock-user-0123".to_string(),
            group_name: "lab".to_string(),
            group_lights: vec!["1".to_string(), "2".to_string()],
            lights,
            inline_error: None,
            registrations: 0,
            writes: Vec::new(),
        }
    }
}

impl MockHueState {
    fn any_on(&self) -> bool {
        self.group_lights.iter().any(|id| {
            self.lights
                .get(id)
                .and_then(|l| l.pointer("/state/on"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        })
    }
}

type Shared = Arc<RwLock<MockHueState>>;

/// Mock Hue bridge
pub struct MockHueBridge {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockHueBridge {
    /// Start a mock bridge on a random port
    pub async fn start() -> Self {
        Self::start_with_state(MockHueState::default()).await
    }

    /// Start with custom initial state
    pub async fn start_with_state(initial_state: MockHueState) -> Self {
        let state = Arc::new(RwLock::new(initial_state));

        let app = Router::new()
            .route("/api/config", get(handle_config))
            .route("/api", post(handle_register))
            .route("/api/{user}", get(handle_full_state))
            .route("/api/{user}/lights", get(handle_lights))
            .route("/api/{user}/lights/{id}/state", put(handle_light_state))
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

    pub async fn set_link_button(&self, pressed: bool) {
        self.state.write().await.link_button = pressed;
    }

    pub async fn set_light_on(&self, id: &str, on: bool) {
        let mut state = self.state.write().await;
        if let Some(light) = state.lights.get_mut(id) {
            light["state"]["on"] = json!(on);
        }
    }

    pub async fn set_inline_error(&self, error: Option<Value>) {
        self.state.write().await.inline_error = error;
    }

    pub async fn writes(&self) -> Vec<(String, Value)> {
        self.state.read().await.writes.clone()
    }

    pub async fn registrations(&self) -> usize {
        self.state.read().await.registrations
    }

    pub async fn light(&self, id: &str) -> Option<Value> {
        self.state.read().await.lights.get(id).cloned()
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn unauthorized(address: &str) -> Value {
    json!([{"error": {"type": 1, "address": address, "description": "unauthorized user"}}])
}

async fn handle_config() -> impl IntoResponse {
    Json(json!({
        "name": "Mock Bridge",
        "bridgeid": "001788FFFE000001",
        "apiversion": "1.50.0",
        "modelid": "BSB002",
    }))
}

async fn handle_register(State(state): State<Shared>, Json(_body): Json<Value>) -> impl IntoResponse {
    let mut s = state.write().await;
    if !s.link_button {
        return Json(json!([{
            "error": {"type": 101, "address": "", "description": "link button not pressed"}
        }]));
    }
    s.registrations += 1;
    Json(json!([{"success": {"username": s.username}}]))
}

async fn handle_full_state(
    State(state): State<Shared>,
    Path(user): Path<String>,
) -> impl IntoResponse {
    let s = state.read().await;
    if user != s.username {
        return Json(unauthorized("/"));
    }
    if let Some(error) = &s.inline_error {
        return Json(error.clone());
    }

    Json(json!({
        "lights": s.lights,
        "groups": {
            "1": {
                "name": s.group_name,
                "lights": s.group_lights,
                "type": "Room",
                "state": {"any_on": s.any_on(), "all_on": false},
            }
        },
        "config": {"name": "Mock Bridge"},
    }))
}

async fn handle_lights(State(state): State<Shared>, Path(user): Path<String>) -> impl IntoResponse {
    let s = state.read().await;
    if user != s.username {
        return Json(unauthorized("/lights"));
    }
    Json(json!(s.lights))
}

async fn handle_light_state(
    State(state): State<Shared>,
    Path((user, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut s = state.write().await;
    if user != s.username {
        return Json(unauthorized(&format!("/lights/{}/state", id)));
    }
    if !s.lights.contains_key(&id) {
        return Json(json!([{
            "error": {"type": 3, "address": format!("/lights/{}", id), "description": "resource not available"}
        }]));
    }

    s.writes.push((id.clone(), body.clone()));

    let mut results = Vec::new();
    if let (Some(light), Some(fields)) = (s.lights.get_mut(&id), body.as_object()) {
        for (key, value) in fields {
            light["state"][key.as_str()] = value.clone();
            results.push(json!({"success": {format!("/lights/{}/state/{}", id, key): value}}));
        }
    }
    Json(Value::Array(results))
}
