use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::CorsLayer;

use crate::control::{ControlCommand, VehicleControlSystem};
use crate::error::TelemetryError;
use crate::live_status::VehicleStatus;
use crate::simulator::TelemetrySimulator;
use crate::types::TelemetrySnapshot;

const DEFAULT_TELEMETRY_LIMIT: usize = 100;
const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct DashboardState {
    simulator: Arc<TelemetrySimulator>,
    control: Arc<VehicleControlSystem>,
    push_interval: Duration,
}

impl DashboardState {
    pub fn new(simulator: Arc<TelemetrySimulator>, control: Arc<VehicleControlSystem>) -> Self {
        Self {
            simulator,
            control,
            push_interval: DEFAULT_PUSH_INTERVAL,
        }
    }

    pub fn with_push_interval(mut self, push_interval: Duration) -> Self {
        self.push_interval = push_interval.max(Duration::from_millis(10));
        self
    }

    fn status(&self) -> VehicleStatus {
        VehicleStatus::capture(&self.simulator, &self.control)
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = match &self {
            TelemetryError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
            TelemetryError::EmergencyActive => StatusCode::CONFLICT,
            TelemetryError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            TelemetryError::InvalidSnapshot(_) | TelemetryError::Noise(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/state", get(state_handler))
        .route("/api/telemetry", get(telemetry_handler))
        .route("/api/command", post(command_handler))
        .route("/api/takeoff", post(takeoff_handler))
        .route("/api/land", post(land_handler))
        .route("/api/emergency/clear", post(clear_emergency_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the dashboard feed until `shutdown` resolves
pub async fn serve<F>(state: DashboardState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("Dashboard listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn state_handler(State(state): State<DashboardState>) -> Json<VehicleStatus> {
    Json(state.status())
}

#[derive(Deserialize)]
struct TelemetryQuery {
    limit: Option<usize>,
}

async fn telemetry_handler(
    State(state): State<DashboardState>,
    Query(query): Query<TelemetryQuery>,
) -> Json<Vec<TelemetrySnapshot>> {
    let limit = query.limit.unwrap_or(DEFAULT_TELEMETRY_LIMIT);
    Json(state.simulator.recent(limit))
}

async fn command_handler(
    State(state): State<DashboardState>,
    Json(command): Json<ControlCommand>,
) -> Result<StatusCode, TelemetryError> {
    command.validate()?;
    state.control.send_command(command)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TakeoffRequest {
    altitude: Option<f64>,
}

async fn takeoff_handler(
    State(state): State<DashboardState>,
    Json(request): Json<TakeoffRequest>,
) -> Result<StatusCode, TelemetryError> {
    let altitude = request
        .altitude
        .unwrap_or(state.control.config().default_takeoff_altitude);
    state.control.execute_takeoff_sequence(altitude)?;
    Ok(StatusCode::ACCEPTED)
}

async fn land_handler(State(state): State<DashboardState>) -> Result<StatusCode, TelemetryError> {
    state.control.execute_landing_sequence()?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

async fn clear_emergency_handler(State(state): State<DashboardState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.control.clear_emergency_mode(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

// Push status on a timer; text frames from the client are taken as commands
async fn handle_socket(socket: WebSocket, state: DashboardState) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = interval(state.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let json = match state.status().to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("Failed to encode status: {}", e);
                        break;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ControlCommand>(&text) {
                        Ok(command) => {
                            if let Err(e) = command.validate().and_then(|_| state.control.send_command(command)) {
                                log::warn!("Dashboard command rejected: {}", e);
                            }
                        }
                        Err(e) => log::warn!("Ignoring malformed dashboard message: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    log::debug!("Dashboard client disconnected");
}
