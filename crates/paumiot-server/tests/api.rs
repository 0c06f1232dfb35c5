//! REST surface tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use paumiot_common::{
    DevicesResponse, HealthResponse, HealthState, ProtocolStats, RlStats, SensorsResponse, SystemMetrics,
};
use paumiot_server::{build_state, router, AppState, ServerConfig, SimulationSettings};
use tower::ServiceExt;

fn state() -> Arc<AppState> {
    let mut config = ServerConfig {
        checkpoint_path: None,
        simulation: SimulationSettings {
            loss_scale: 0.0,
            real_delay: false,
            seed: Some(5),
            ..SimulationSettings::default()
        },
        ..ServerConfig::default()
    };
    config.adaptive.dispatch.seed = Some(5);
    build_state(&config).unwrap()
}

async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body)
}

async fn post_json(state: &Arc<AppState>, body: &str) -> (StatusCode, Vec<u8>) {
    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sensor/data")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let state = state();
    let (status, body) = get(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, HealthState::Ok);
}

#[tokio::test]
async fn test_cold_stats_are_zero() {
    let state = state();

    let (_, body) = get(&state, "/api/v1/protocols/stats").await;
    let protocols: ProtocolStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(protocols, ProtocolStats::default());

    let (_, body) = get(&state, "/api/v1/rl/stats").await;
    let rl: RlStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(rl.bandit_best_arm, "none");
    assert_eq!(rl.tree_version, 0);

    let (_, body) = get(&state, "/api/v1/metrics").await;
    let metrics: SystemMetrics = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics.messages_total, 0);
}

#[tokio::test]
async fn test_sensor_data_dispatches_once() {
    let state = state();

    let (status, body) = post_json(&state, r#"{"device_id": "greenhouse-1", "temperature": 22.5, "humidity": 61}"#).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (_, body) = get(&state, "/api/v1/protocols/stats").await;
    let protocols: ProtocolStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(protocols.total(), 1);
    // Cold learner explores the first arm.
    assert_eq!(protocols.mqtt, 1);

    let (_, body) = get(&state, "/api/v1/rl/stats").await;
    let rl: RlStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(rl.bandit_pulls, 1);
    assert_eq!(rl.total_experiences, 1);
    assert_eq!(rl.bandit_best_arm, "mqtt");

    let (_, body) = get(&state, "/api/v1/devices").await;
    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(raw["devices"].is_array());
    let DevicesResponse { devices } = serde_json::from_slice(&body).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "greenhouse-1");
    assert_eq!(devices[0].protocol, "mqtt");

    let (_, body) = get(&state, "/api/v1/sensors?limit=1").await;
    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(raw["readings"].is_array());
    let SensorsResponse { readings } = serde_json::from_slice(&body).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].sensor_type, "humidity");

    let (_, body) = get(&state, "/api/v1/metrics").await;
    let metrics: SystemMetrics = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics.messages_total, 1);
    assert_eq!(metrics.active_devices, 1);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test]
async fn test_invalid_payloads_are_rejected() {
    let state = state();

    let (status, body) = post_json(&state, r#"{"device_id": "", "value": 1}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].as_str().unwrap().contains("device_id"));

    let (status, _) = post_json(&state, r#"{"device_id": "d-1"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(&state, "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error.get("error").is_some());

    // Rejected requests never reach the dispatcher.
    let (_, body) = get(&state, "/api/v1/protocols/stats").await;
    let protocols: ProtocolStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(protocols.total(), 0);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let state = state();
    post_json(&state, r#"{"device_id": "d-1", "value": 7.0}"#).await;

    let (status, body) = get(&state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("paumiot_dispatch_total"));
    assert!(text.contains("paumiot_experiences 1"));
}

#[tokio::test]
async fn test_status_counts_devices_and_sensors() {
    let state = state();
    post_json(&state, r#"{"device_id": "a", "temperature": 20.0}"#).await;
    post_json(&state, r#"{"device_id": "b", "value": 3.0, "sensor_type": "co2", "unit": "ppm"}"#).await;

    let (_, body) = get(&state, "/api/v1/status").await;
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["status"], "running");
    assert_eq!(status["devices"], 2);
    assert_eq!(status["sensors"], 2);
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let state = state();
    let response = router(state)
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/rl/stats")
                .header("origin", "http://localhost:3000")
                .header("access-control-request-method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
