//! HTTP API handlers

use crate::adapters::hue::HueSession;
use crate::adapters::nanoleaf::NanoleafSession;
use crate::adapters::{DeviceAddress, DeviceFamily, DeviceSession};
use crate::bus::SharedBus;
use crate::color::Rgb;
use crate::config::Config;
use crate::coordinator::{CommandCoordinator, LightIntent};
use crate::discovery::{DiscoveryGateway, DiscoveryResult};
use crate::error::{LightError, PlaybackError};
use crate::playback::PlaybackController;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub type LightCoordinator = CommandCoordinator<HueSession, NanoleafSession>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lights: Arc<LightCoordinator>,
    pub discovery: Arc<DiscoveryGateway>,
    pub playback: Arc<PlaybackController>,
    pub music_dir: PathBuf,
    pub bus: SharedBus,
}

impl AppState {
    pub fn new(
        lights: Arc<LightCoordinator>,
        discovery: Arc<DiscoveryGateway>,
        playback: Arc<PlaybackController>,
        music_dir: PathBuf,
        bus: SharedBus,
    ) -> Self {
        Self {
            lights,
            discovery,
            playback,
            music_dir,
            bus,
        }
    }

    /// Sessions, scanners and player built from configuration
    pub fn from_config(config: &Config, bus: SharedBus) -> Self {
        let hue = Arc::new(HueSession::new(&config.hue, config.http_timeout()));
        let nanoleaf = Arc::new(NanoleafSession::new(
            &config.nanoleaf,
            config.http_timeout(),
        ));

        Self::new(
            Arc::new(CommandCoordinator::new(hue, nanoleaf, bus.clone())),
            Arc::new(DiscoveryGateway::from_config(&config.discovery, bus.clone())),
            Arc::new(PlaybackController::from_config(&config.music, bus.clone())),
            config.music.dir.clone(),
            bus,
        )
    }
}

/// All routes behind CORS, gzip and request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/status", get(status_handler))
        // Lights
        .route("/discover_bridge", get(discover_handler))
        .route("/connect_lights", post(connect_lights_handler))
        .route("/control_lights", post(control_lights_handler))
        .route("/control_nanoleaf", post(control_nanoleaf_handler))
        .route("/control_nanoleaf", put(control_nanoleaf_handler))
        // Music
        .route("/control_music/{action}", get(control_music_handler))
        // Event stream (SSE)
        .route("/events", get(events_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn executed() -> Response {
    (
        StatusCode::OK,
        Json(json!({"message": "command executed successfully"})),
    )
        .into_response()
}

impl LightError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LightError::InvalidAddress(_)
            | LightError::InvalidColor(_)
            | LightError::InvalidLightId(_) => StatusCode::BAD_REQUEST,
            LightError::NotConnected(_) => StatusCode::CONFLICT,
            LightError::DeviceAuthError(_) => StatusCode::UNAUTHORIZED,
            LightError::GroupNotFound(_) | LightError::LightNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            LightError::DeviceUnreachable { .. } => StatusCode::BAD_GATEWAY,
            LightError::DeviceReportedError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LightError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            // The device's own status goes back verbatim
            LightError::DeviceReportedError { payload, .. } => (status, Json(payload)).into_response(),
            other => error_response(status, other),
        }
    }
}

impl IntoResponse for PlaybackError {
    fn into_response(self) -> Response {
        let status = match &self {
            PlaybackError::MissingDirectory(_) => StatusCode::NOT_FOUND,
            PlaybackError::AlreadyPlaying => StatusCode::CONFLICT,
            PlaybackError::Backend(_) | PlaybackError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self)
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub authorized: bool,
    pub address: Option<DeviceAddress>,
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub hue: SessionStatus,
    pub nanoleaf: SessionStatus,
    pub playing: bool,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let hue = state.lights.hue();
    let nanoleaf = state.lights.nanoleaf();

    Json(StatusResponse {
        service: "ambilight-bridge",
        version: env!("AMBI_VERSION"),
        git_sha: env!("AMBI_GIT_SHA"),
        hue: SessionStatus {
            connected: hue.is_connected().await,
            authorized: hue.is_authorized().await,
            address: hue.address().await,
        },
        nanoleaf: SessionStatus {
            connected: nanoleaf.is_connected().await,
            authorized: nanoleaf.is_authorized().await,
            address: nanoleaf.address().await,
        },
        playing: state.playback.is_playing().await,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Light handlers
// =============================================================================

/// GET /discover_bridge - Scan the LAN for bridges and panels
pub async fn discover_handler(State(state): State<AppState>) -> Json<DiscoveryResult> {
    Json(state.discovery.discover().await)
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    /// Nanoleaf panel address
    pub dock_ip: String,
    /// Hue bridge address
    pub bridge_ip: String,
}

fn connect_outcome(result: &Result<(), LightError>) -> Value {
    match result {
        Ok(()) => json!("connected"),
        Err(e) => json!({"error": e.to_string()}),
    }
}

/// POST /connect_lights - Connect both device sessions
pub async fn connect_lights_handler(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    // Both addresses are validated before either device is touched
    let nanoleaf = match DeviceAddress::parse(&req.dock_ip) {
        Ok(addr) => addr,
        Err(e) => return e.into_response(),
    };
    let hue = match DeviceAddress::parse(&req.bridge_ip) {
        Ok(addr) => addr,
        Err(e) => return e.into_response(),
    };

    let report = state.lights.connect_all(hue, nanoleaf).await;
    if report.all_ok() {
        return (StatusCode::OK, Json(json!({"message": "dock_connected"}))).into_response();
    }

    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": "failed to connect all lights",
            "hue": connect_outcome(&report.hue),
            "nanoleaf": connect_outcome(&report.nanoleaf),
        })),
    )
        .into_response()
}

/// Light command body shared by both families
#[derive(Debug, Default, Deserialize)]
pub struct LightCommandRequest {
    /// `[r, g, b]`, kept loose so a bad color is an `InvalidColor`, not a parse failure
    #[serde(default)]
    pub rgb: Option<Value>,
    #[serde(default)]
    pub on: Option<bool>,
    /// Hue light ids, numeric as numbers or strings
    #[serde(default)]
    pub lights: Option<Vec<Value>>,
}

impl LightCommandRequest {
    pub fn into_intent(self) -> Result<LightIntent, LightError> {
        let rgb = self.rgb.as_ref().map(parse_rgb).transpose()?;

        let target_ids = self
            .lights
            .map(|ids| ids.iter().map(parse_light_id).collect::<Result<BTreeSet<_>, _>>())
            .transpose()?;

        Ok(LightIntent {
            rgb,
            on: self.on,
            target_ids,
        })
    }
}

fn parse_rgb(raw: &Value) -> Result<Rgb, LightError> {
    let components = raw
        .as_array()
        .ok_or_else(|| LightError::InvalidColor(format!("expected [r, g, b], got {}", raw)))?;
    let channels = components
        .iter()
        .map(|c| {
            c.as_i64()
                .ok_or_else(|| LightError::InvalidColor(format!("{} is not an integer", c)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Rgb::from_components(&channels)
}

/// Bridge light ids are decimal integers; `"07"` and `7` both name light `"7"`
fn parse_light_id(raw: &Value) -> Result<String, LightError> {
    let id = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    id.map(|id| id.to_string())
        .ok_or_else(|| LightError::InvalidLightId(raw.to_string()))
}

async fn apply(state: &AppState, family: DeviceFamily, req: LightCommandRequest) -> Response {
    let intent = match req.into_intent() {
        Ok(intent) => intent,
        Err(e) => return e.into_response(),
    };

    match state.lights.apply_light_intent(family, intent).await {
        Ok(ack) => {
            tracing::debug!(?ack, "Light command applied");
            executed()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /control_lights - Hue group color and power
pub async fn control_lights_handler(
    State(state): State<AppState>,
    Json(req): Json<LightCommandRequest>,
) -> Response {
    apply(&state, DeviceFamily::Hue, req).await
}

/// POST|PUT /control_nanoleaf - Panel color or power-off
pub async fn control_nanoleaf_handler(
    State(state): State<AppState>,
    Json(req): Json<LightCommandRequest>,
) -> Response {
    // The panel is one unit; light ids do not apply
    let req = LightCommandRequest {
        lights: None,
        ..req
    };
    apply(&state, DeviceFamily::Nanoleaf, req).await
}

// =============================================================================
// Music handlers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicAction {
    Play,
    Stop,
}

impl std::str::FromStr for MusicAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(MusicAction::Play),
            "stop" => Ok(MusicAction::Stop),
            other => Err(format!("Unknown music action: {}", other)),
        }
    }
}

/// GET /control_music/{action} - Play the music directory (blocks until done) or stop
pub async fn control_music_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Response {
    let action = match action.parse::<MusicAction>() {
        Ok(action) => action,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match action {
        MusicAction::Play => match state.playback.play(&state.music_dir).await {
            Ok(report) => (
                StatusCode::OK,
                Json(json!({
                    "message": "command executed successfully",
                    "played": report.played,
                    "stopped": report.stopped,
                })),
            )
                .into_response(),
            Err(e) => e.into_response(),
        },
        MusicAction::Stop => match state.playback.stop().await {
            Ok(()) => executed(),
            Err(e) => e.into_response(),
        },
    }
}

// =============================================================================
// SSE Events
// =============================================================================

/// GET /events - Server-Sent Events stream
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        },
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
