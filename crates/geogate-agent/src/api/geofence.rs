//! Geofence lifecycle API endpoints.
//!
//! Turning auto-validation on walks through the enable gates (device
//! identity, server authorization, location permissions). Once on, the
//! engine polls every 30 seconds; `POST /api/geofence/poll` runs a tick
//! immediately.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use geogate_core::{GeofenceState, PollOutcome, ToggleOutcome};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the geofence router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_geofence))
        .route("/toggle", post(toggle_geofence))
        .route("/poll", post(poll_geofence))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current geofence state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GeofenceResponse {
    /// Engine state.
    pub state: GeofenceState,

    /// Whether the foreground polling loop is scheduled.
    #[schema(example = true)]
    pub polling: bool,

    /// Whether the background task is registered.
    #[schema(example = false)]
    pub background_running: bool,
}

/// Request body for toggling the geofence.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "enabled": true }))]
pub struct ToggleRequest {
    /// Desired state.
    #[schema(example = true)]
    pub enabled: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the geofence state.
#[utoipa::path(
    get,
    path = "/api/geofence",
    tag = "geofence",
    operation_id = "getGeofence",
    summary = "Get geofence state",
    description = "Returns whether auto-validation is on, the distance to the door at \
        the last fix, whether that fix was inside the 100 m geofence, and the last \
        error recorded by a poll tick.",
    responses(
        (status = 200, description = "Geofence state retrieved", body = GeofenceResponse),
        (status = 500, description = "Scheduler unavailable", body = super::error::ErrorResponse)
    )
)]
pub async fn get_geofence(State(state): State<SharedState>) -> ApiResult<Json<GeofenceResponse>> {
    let engine = state.engine();
    Ok(Json(GeofenceResponse {
        state: engine.state().await,
        polling: engine.is_polling().await,
        background_running: state.background_registered().await?,
    }))
}

/// Turn auto-validation on or off.
///
/// A refused toggle is reported in the body with `success: false`, not as an
/// HTTP error.
#[utoipa::path(
    post,
    path = "/api/geofence/toggle",
    tag = "geofence",
    operation_id = "toggleGeofence",
    summary = "Enable or disable auto-validation",
    description = "Disabling always succeeds. Enabling requires a device identifier, \
        server authorization for this device and foreground location permission. \
        A missing background permission still enables, with `foreground_only: true`.",
    request_body = ToggleRequest,
    responses(
        (status = 200, description = "Toggle processed", body = ToggleOutcome)
    )
)]
pub async fn toggle_geofence(
    State(state): State<SharedState>,
    Json(request): Json<ToggleRequest>,
) -> Json<ToggleOutcome> {
    Json(state.engine().toggle(request.enabled).await)
}

/// Run one poll tick now.
#[utoipa::path(
    post,
    path = "/api/geofence/poll",
    tag = "geofence",
    operation_id = "pollGeofence",
    summary = "Run a poll tick",
    description = "Runs the foreground check immediately: validation-needed query, \
        authorization re-check, location fix and, inside the geofence, \
        auto-validation. Failures are reported in the outcome and recorded as \
        `last_error`.",
    responses(
        (status = 200, description = "Tick completed", body = PollOutcome)
    )
)]
pub async fn poll_geofence(State(state): State<SharedState>) -> Json<PollOutcome> {
    Json(state.engine().poll_once().await)
}
