//! End-to-end tests for the agent REST API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use geogate_agent::api::create_router;
use geogate_agent::state::AppState;
use geogate_core::mock::{FakeDoorApi, ManualClock};
use geogate_core::settings::{DEVICE_ID_KEY, GEO_ENABLED_KEY};
use geogate_core::{
    GeogateConfig, MemorySettingsStore, PermissionStatus, SettingsStore, DOOR_LOCATION,
};
use serde_json::{json, Value};

const NOW_MS: i64 = 1_700_000_000_000;
const DEVICE_ID: &str = "device-under-test";

struct Harness {
    server: TestServer,
    door: Arc<FakeDoorApi>,
    store: Arc<MemorySettingsStore>,
}

async fn harness_with(door: FakeDoorApi, background: PermissionStatus) -> Harness {
    let door = Arc::new(door);
    let store = Arc::new(MemorySettingsStore::with_entries([(DEVICE_ID_KEY, DEVICE_ID)]));

    let mut config = GeogateConfig::default();
    config.location.foreground_permission = PermissionStatus::Granted;
    config.location.background_permission = background;

    let state = AppState::with_components(
        config,
        door.clone(),
        store.clone(),
        Arc::new(ManualClock::new(NOW_MS)),
    )
    .await
    .unwrap();

    Harness {
        server: TestServer::new(create_router(state)).unwrap(),
        door,
        store,
    }
}

async fn harness() -> Harness {
    harness_with(FakeDoorApi::ready(), PermissionStatus::Granted).await
}

async fn enable(server: &TestServer) -> Value {
    let response = server
        .post("/api/geofence/toggle")
        .json(&json!({ "enabled": true }))
        .await;
    response.assert_status_ok();
    response.json()
}

/// Roughly 1 km north of the door.
fn far_away() -> Value {
    json!({ "latitude": DOOR_LOCATION.latitude + 0.009, "longitude": DOOR_LOCATION.longitude })
}

fn at_door() -> Value {
    json!({ "latitude": DOOR_LOCATION.latitude, "longitude": DOOR_LOCATION.longitude })
}

#[tokio::test]
async fn health_reports_device_and_flag() {
    let h = harness().await;

    let response = h.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["device_id"], DEVICE_ID);
    assert_eq!(body["geofence_enabled"], false);
}

#[tokio::test]
async fn geofence_starts_disabled() {
    let h = harness().await;

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["state"]["status"], "disabled");
    assert_eq!(body["state"]["enabled"], false);
    assert_eq!(body["polling"], false);
    assert_eq!(body["background_running"], false);
}

#[tokio::test]
async fn toggle_on_persists_and_starts_background() {
    let h = harness().await;

    let outcome = enable(&h.server).await;
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["enabled"], true);
    assert_eq!(outcome["foreground_only"], false);

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["state"]["status"], "enabled");
    assert_eq!(body["polling"], true);
    assert_eq!(body["background_running"], true);
    assert_eq!(
        h.store.get(GEO_ENABLED_KEY).await.unwrap().as_deref(),
        Some("true")
    );

    let health: Value = h.server.get("/health").await.json();
    assert_eq!(health["geofence_enabled"], true);
}

#[tokio::test]
async fn toggle_on_without_background_permission_is_foreground_only() {
    let h = harness_with(FakeDoorApi::ready(), PermissionStatus::Denied).await;

    let outcome = enable(&h.server).await;
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["foreground_only"], true);

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["background_running"], false);
}

#[tokio::test]
async fn toggle_on_refused_for_unauthorized_device() {
    let h = harness_with(
        FakeDoorApi::ready().unauthorized("Geo unlock disabled for this device"),
        PermissionStatus::Granted,
    )
    .await;

    let outcome = enable(&h.server).await;
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["enabled"], false);
    assert_eq!(outcome["message"], "Geo unlock disabled for this device");
    assert_eq!(
        h.store.get(GEO_ENABLED_KEY).await.unwrap().as_deref(),
        Some("false")
    );
}

#[tokio::test]
async fn toggle_off_stops_everything() {
    let h = harness().await;
    enable(&h.server).await;

    let response = h
        .server
        .post("/api/geofence/toggle")
        .json(&json!({ "enabled": false }))
        .await;
    response.assert_status_ok();
    let outcome: Value = response.json();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["enabled"], false);

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["state"]["status"], "disabled");
    assert_eq!(body["polling"], false);
    assert_eq!(body["background_running"], false);
}

#[tokio::test]
async fn poll_while_disabled_is_skipped() {
    let h = harness().await;

    let outcome: Value = h.server.post("/api/geofence/poll").await.json();
    assert_eq!(outcome["outcome"], "skipped");
    assert_eq!(h.door.validation_needed_calls(), 0);
}

#[tokio::test]
async fn poll_far_from_door_is_out_of_range() {
    let h = harness().await;
    h.server.post("/api/location").json(&far_away()).await.assert_status_ok();
    enable(&h.server).await;

    let outcome: Value = h.server.post("/api/geofence/poll").await.json();
    assert_eq!(outcome["outcome"], "evaluated");
    assert_eq!(outcome["decision"]["decision"], "out_of_range");
    assert_eq!(h.door.validate_with_geo_calls(), 0);

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["state"]["is_near_door"], false);
    assert!(body["state"]["distance_meters"].as_f64().unwrap() > 900.0);
}

#[tokio::test]
async fn poll_at_door_validates_once() {
    let h = harness().await;
    let accepted: Value = h.server.post("/api/location").json(&at_door()).await.json();
    assert!(accepted["distance_meters"].as_f64().unwrap() < 1.0);
    enable(&h.server).await;

    h.server.post("/api/geofence/poll").await.assert_status_ok();
    // The door no longer needs a code after a successful validation.
    let again: Value = h.server.post("/api/geofence/poll").await.json();
    assert_eq!(again["outcome"], "validation_not_needed");
    assert_eq!(h.door.validate_with_geo_calls(), 1);

    let body: Value = h.server.get("/api/geofence").await.json();
    assert_eq!(body["state"]["last_decision"]["decision"], "validated");
}

#[tokio::test]
async fn location_out_of_range_is_rejected() {
    let h = harness().await;

    let response = h
        .server
        .post("/api/location")
        .json(&json!({ "latitude": 95.0, "longitude": 0.0 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_coordinate");
}

#[tokio::test]
async fn batch_requires_registered_task() {
    let h = harness().await;

    let response = h
        .server
        .post("/api/location/batch")
        .json(&json!({ "locations": [at_door()] }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "background_task_not_registered");
}

#[tokio::test]
async fn batch_at_door_validates() {
    let h = harness().await;
    h.server.post("/api/location").json(&far_away()).await;
    enable(&h.server).await;

    let response = h
        .server
        .post("/api/location/batch")
        .json(&json!({ "locations": [at_door(), far_away()] }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], true);
    assert_eq!(body["decision"]["decision"], "validated");
    assert_eq!(h.door.validate_with_geo_calls(), 1);
}

#[tokio::test]
async fn batch_ignores_trailing_entries_with_bad_coordinates() {
    let h = harness().await;
    h.server.post("/api/location").json(&far_away()).await;
    enable(&h.server).await;

    let response = h
        .server
        .post("/api/location/batch")
        .json(&json!({ "locations": [at_door(), { "latitude": 95.0, "longitude": 0.0 }] }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], true);
    assert_eq!(body["decision"]["decision"], "validated");
}

#[tokio::test]
async fn batch_with_bad_first_entry_is_rejected() {
    let h = harness().await;
    enable(&h.server).await;

    let response = h
        .server
        .post("/api/location/batch")
        .json(&json!({ "locations": [{ "latitude": 95.0, "longitude": 0.0 }, at_door()] }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(h.door.validate_with_geo_calls(), 0);
}

#[tokio::test]
async fn batch_with_task_error_is_dropped() {
    let h = harness().await;
    enable(&h.server).await;

    let body: Value = h
        .server
        .post("/api/location/batch")
        .json(&json!({ "locations": [at_door()], "error": "provider unavailable" }))
        .await
        .json();
    assert_eq!(body["processed"], false);
    assert_eq!(h.door.validate_with_geo_calls(), 0);
}

#[tokio::test]
async fn door_events_update_snapshot() {
    let h = harness().await;

    let connected: Value = h
        .server
        .post("/api/door/events")
        .json(&json!({ "event": "connect" }))
        .await
        .json();
    assert_eq!(connected["recognized"], true);
    assert_eq!(connected["snapshot"]["connected"], true);
    assert_eq!(connected["snapshot"]["validation_needed"], true);

    let unlocked: Value = h
        .server
        .post("/api/door/events")
        .json(&json!({ "event": "esp32:door-state-changed", "payload": 1 }))
        .await
        .json();
    assert_eq!(unlocked["snapshot"]["doors_unlocked"], true);

    let unknown: Value = h
        .server
        .post("/api/door/events")
        .json(&json!({ "event": "esp32:firmware", "payload": "1.2" }))
        .await
        .json();
    assert_eq!(unknown["recognized"], false);

    let snapshot: Value = h.server.get("/api/door").await.json();
    assert_eq!(snapshot["doors_unlocked"], true);
}

#[tokio::test]
async fn door_event_with_bad_payload_is_rejected() {
    let h = harness().await;

    let response = h
        .server
        .post("/api/door/events")
        .json(&json!({ "event": "esp32:validation-state-changed", "payload": "yes" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_event_payload");
}

#[tokio::test]
async fn validate_code_relays_server_verdict() {
    let h = harness_with(
        FakeDoorApi::ready().secret_code("4821"),
        PermissionStatus::Granted,
    )
    .await;

    let wrong: Value = h
        .server
        .post("/api/door/validate")
        .json(&json!({ "secret_code": "0000" }))
        .await
        .json();
    assert_eq!(wrong["success"], false);

    let right: Value = h
        .server
        .post("/api/door/validate")
        .json(&json!({ "secret_code": " 4821 " }))
        .await
        .json();
    assert_eq!(right["success"], true);
    assert_eq!(h.door.validate_code_calls(), 2);

    let empty = h
        .server
        .post("/api/door/validate")
        .json(&json!({ "secret_code": "   " }))
        .await;
    empty.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(h.door.validate_code_calls(), 2);
}

#[tokio::test]
async fn door_server_failure_maps_to_bad_gateway() {
    let h = harness().await;
    h.door.fail_requests(true);

    let response = h
        .server
        .post("/api/door/validate")
        .json(&json!({ "secret_code": "4821" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn push_token_is_registered_once() {
    let h = harness().await;

    let first: Value = h
        .server
        .post("/api/door/push-token")
        .json(&json!({ "push_token": "token-a" }))
        .await
        .json();
    assert_eq!(first["result"], "registered");

    let second: Value = h
        .server
        .post("/api/door/push-token")
        .json(&json!({ "push_token": "token-a" }))
        .await
        .json();
    assert_eq!(second["result"], "already_registered");

    assert_eq!(
        h.door.registered_tokens(),
        vec![("token-a".to_string(), DEVICE_ID.to_string())]
    );
}

#[tokio::test]
async fn openapi_document_is_served() {
    let h = harness().await;

    let body: Value = h.server.get("/api/openapi.json").await.json();
    assert_eq!(body["info"]["title"], "geogate API");
    assert!(body["paths"]["/api/location/batch"].is_object());
}

#[tokio::test]
async fn file_backed_state_keeps_device_identity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GeogateConfig::default();
    config.storage.data_dir = Some(dir.path().to_path_buf());

    let first = AppState::new(config.clone()).await.unwrap();
    let device = first.device().to_string();
    first.engine().shutdown().await;
    drop(first);

    let second = AppState::new(config).await.unwrap();
    assert_eq!(second.device().to_string(), device);
    assert!(!second.engine().state().await.enabled);
    assert!(dir.path().join("settings.json").exists());
}
