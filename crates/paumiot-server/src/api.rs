//! REST API routes

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use paumiot_adaptive::AdaptiveEngine;
use paumiot_common::{
    DevicesResponse, HealthResponse, HealthState, PaumiotError, ProtocolStats, RlStats, SensorDataPayload,
    SensorsResponse, SystemMetrics, SystemStatus,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error};

use crate::registry::InMemoryDeviceRegistry;
use crate::SERVER_VERSION;

/// Shared state behind every handler
pub struct AppState {
    pub engine: Arc<AdaptiveEngine>,
    pub registry: Arc<InMemoryDeviceRegistry>,
    pub prometheus: Registry,
    pub started: Instant,
}

impl AppState {
    pub fn new(engine: Arc<AdaptiveEngine>, registry: Arc<InMemoryDeviceRegistry>, prometheus: Registry) -> Self {
        Self {
            engine,
            registry,
            prometheus,
            started: Instant::now(),
        }
    }
}

/// Error body `{"error": ...}` with a matching status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PaumiotError> for ApiError {
    fn from(err: PaumiotError) -> Self {
        let status = match &err {
            PaumiotError::Validation(_) | PaumiotError::UnknownArm(_) => StatusCode::BAD_REQUEST,
            PaumiotError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SensorsQuery {
    pub limit: Option<usize>,
}

/// Build the router with CORS open to any origin
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/version", get(version))
        .route("/api/v1/devices", get(devices))
        .route("/api/v1/sensors", get(sensors))
        .route("/api/v1/metrics", get(system_metrics))
        .route("/api/v1/protocols/stats", get(protocol_stats))
        .route("/api/v1/rl/stats", get(rl_stats))
        .route("/api/sensor/data", post(sensor_data))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthState::Ok,
        message: None,
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        status: "running".to_string(),
        version: SERVER_VERSION.to_string(),
        uptime: state.started.elapsed().as_secs(),
        devices: state.registry.device_count() as u64,
        sensors: state.registry.sensor_count() as u64,
    })
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "paumiot-server",
        "version": SERVER_VERSION,
        "description": "Adaptive protocol selection middleware for IoT",
    }))
}

async fn devices(State(state): State<Arc<AppState>>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        devices: state.registry.devices(),
    })
}

async fn sensors(State(state): State<Arc<AppState>>, Query(query): Query<SensorsQuery>) -> Json<SensorsResponse> {
    Json(SensorsResponse {
        readings: state.registry.recent_readings(query.limit.unwrap_or(100)),
    })
}

async fn system_metrics(State(state): State<Arc<AppState>>) -> Json<SystemMetrics> {
    Json(state.engine.system_metrics())
}

async fn protocol_stats(State(state): State<Arc<AppState>>) -> Json<ProtocolStats> {
    Json(state.engine.protocol_stats())
}

async fn rl_stats(State(state): State<Arc<AppState>>) -> Json<RlStats> {
    Json(state.engine.rl_stats())
}

/// Ingest one reading and route it through the adaptive core
async fn sensor_data(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SensorDataPayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = body?;
    payload.validate()?;

    state.registry.observe(&payload);
    let bytes = serde_json::to_vec(&payload).map_err(PaumiotError::from)?;
    let report = state.engine.dispatch(&payload.device_id, &bytes).await;
    state.registry.record_delivery(&payload, report.arm, report.delivered());

    debug!(
        device_id = %payload.device_id,
        arm = %report.arm,
        source = ?report.source,
        state = ?report.state,
        reward = report.reward,
        "Sensor data dispatched"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.prometheus.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}
