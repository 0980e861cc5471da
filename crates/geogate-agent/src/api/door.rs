//! Door state and manual validation API endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use geogate_core::{DoorEvent, DoorSnapshot, PushRegistration, ValidationResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the door router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_door))
        .route("/events", post(relay_event))
        .route("/validate", post(validate_code))
        .route("/push-token", post(register_push_token))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A realtime frame relayed from the door channel.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "event": "esp32:door-state-changed", "payload": 1 }))]
pub struct DoorEventRequest {
    /// Event name.
    #[schema(example = "esp32:door-state-changed")]
    pub event: String,

    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of relaying a frame.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DoorEventResponse {
    /// Whether the event name was recognized.
    #[schema(example = true)]
    pub recognized: bool,

    /// Door state after the frame.
    pub snapshot: DoorSnapshot,
}

/// Request body for manual validation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "secret_code": "4821" }))]
pub struct ValidateCodeRequest {
    /// Code shown by the door.
    #[schema(example = "4821", min_length = 1)]
    pub secret_code: String,
}

/// Request body for push token registration.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "push_token": "fcm:APA91bH..." }))]
pub struct PushTokenRequest {
    /// Token issued by the push provider.
    #[schema(min_length = 1)]
    pub push_token: String,
}

/// Result of push token registration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushTokenResponse {
    /// What happened.
    pub result: PushRegistration,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the latest door state.
#[utoipa::path(
    get,
    path = "/api/door",
    tag = "door",
    operation_id = "getDoor",
    summary = "Get door state",
    description = "Returns the door state folded from the realtime channel: whether \
        the channel is connected, whether the door is unlocked and whether it is \
        waiting for a code.",
    responses(
        (status = 200, description = "Door state retrieved", body = DoorSnapshot)
    )
)]
pub async fn get_door(State(state): State<SharedState>) -> Json<DoorSnapshot> {
    Json(state.tracker().snapshot())
}

/// Relay a realtime frame.
#[utoipa::path(
    post,
    path = "/api/door/events",
    tag = "door",
    operation_id = "relayDoorEvent",
    summary = "Relay a door channel frame",
    description = "Applies one frame from the realtime door channel. Recognized events: \
        `connect`, `disconnect`, `esp32:door-state-changed` and \
        `esp32:doorState-response` (integer, 1 = unlocked), \
        `esp32:validation-state-changed` (boolean). Unknown events are ignored.",
    request_body = DoorEventRequest,
    responses(
        (status = 200, description = "Frame applied", body = DoorEventResponse),
        (status = 400, description = "Malformed payload", body = super::error::ErrorResponse),
        (status = 502, description = "Door server unreachable on connect", body = super::error::ErrorResponse)
    )
)]
pub async fn relay_event(
    State(state): State<SharedState>,
    Json(request): Json<DoorEventRequest>,
) -> ApiResult<Json<DoorEventResponse>> {
    let parsed = DoorEvent::parse(&request.event, &request.payload)
        .map_err(|e| ApiError::bad_request("invalid_event_payload", e.to_string()))?;

    match parsed {
        Some(event) => state.tracker().apply(event).await?,
        None => debug!(event = %request.event, "Ignoring unknown door event"),
    }

    Ok(Json(DoorEventResponse {
        recognized: parsed.is_some(),
        snapshot: state.tracker().snapshot(),
    }))
}

/// Validate with a typed code.
#[utoipa::path(
    post,
    path = "/api/door/validate",
    tag = "door",
    operation_id = "validateCode",
    summary = "Validate with a secret code",
    description = "Submits the code the door displays. The server's verdict is \
        returned as-is; a wrong code is `success: false`, not an HTTP error.",
    request_body = ValidateCodeRequest,
    responses(
        (status = 200, description = "Server verdict", body = ValidationResult),
        (status = 400, description = "Empty code", body = super::error::ErrorResponse),
        (status = 502, description = "Door server unreachable", body = super::error::ErrorResponse)
    )
)]
pub async fn validate_code(
    State(state): State<SharedState>,
    Json(request): Json<ValidateCodeRequest>,
) -> ApiResult<Json<ValidationResult>> {
    let code = request.secret_code.trim();
    if code.is_empty() {
        return Err(ApiError::bad_request(
            "empty_secret_code",
            "Secret code cannot be empty",
        ));
    }

    let result = state.door_api().validate_code(code).await?;
    info!(success = result.success, "Manual validation submitted");
    Ok(Json(result))
}

/// Register a push token.
#[utoipa::path(
    post,
    path = "/api/door/push-token",
    tag = "door",
    operation_id = "registerPushToken",
    summary = "Register a push token",
    description = "Tells the door server which push token reaches this device. An \
        unchanged token is not sent again.",
    request_body = PushTokenRequest,
    responses(
        (status = 200, description = "Registration handled", body = PushTokenResponse),
        (status = 400, description = "Empty token", body = super::error::ErrorResponse),
        (status = 502, description = "Door server unreachable", body = super::error::ErrorResponse)
    )
)]
pub async fn register_push_token(
    State(state): State<SharedState>,
    Json(request): Json<PushTokenRequest>,
) -> ApiResult<Json<PushTokenResponse>> {
    if request.push_token.trim().is_empty() {
        return Err(ApiError::bad_request(
            "empty_push_token",
            "Push token cannot be empty",
        ));
    }

    let result = state.push().register(&request.push_token).await?;
    Ok(Json(PushTokenResponse { result }))
}
