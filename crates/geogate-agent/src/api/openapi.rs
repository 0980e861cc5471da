//! OpenAPI specification generation for the geogate agent API.
//!
//! The specification is served at `/api/openapi.json`, browsable through
//! Swagger UI at `/docs`, and written to disk by the `gen-openapi` binary
//! for client generation by the platform bridge.

use axum::Json;
use geogate_core::{
    AuthorizationResult, BackgroundUpdateOptions, Decision, DoorSnapshot, GeoCoordinate,
    GeofenceNotice, GeofenceState, GeofenceStatus, PermissionStatus, PollOutcome, PollPhase,
    PushRegistration, ToggleOutcome, ValidationResult,
};
use utoipa::OpenApi;

use super::door::{
    DoorEventRequest, DoorEventResponse, PushTokenRequest, PushTokenResponse, ValidateCodeRequest,
};
use super::error::ErrorResponse;
use super::geofence::{GeofenceResponse, ToggleRequest};
use super::health::HealthResponse;
use super::location::{BatchResponse, LocationAccepted, LocationBatch, LocationReport};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for the geogate agent.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "geogate API",
        version = "0.1.0",
        description = r#"
# geogate API

geogate validates a door automatically when an authorized device arrives within
100 meters of it.

## Overview

The agent runs next to the platform bridge and provides:

1. **Geofence lifecycle**: enable or disable auto-validation, inspect its state
2. **Location bridge**: receive foreground fixes and background batches
3. **Door state**: relay realtime frames and submit typed codes

## Auto-validation rules

- A fix must be strictly inside the 100 m radius
- At most one auto-validation every 120 seconds, shared by foreground and background
- The door must be waiting for a code, and the server must authorize this device,
  both checked just before validating
- A device the server stops authorizing has auto-validation turned off
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local geogate agent")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "geofence",
            description = "Enable/disable lifecycle and poll ticks"
        ),
        (
            name = "location",
            description = "Foreground fixes and background batches from the platform bridge"
        ),
        (
            name = "door",
            description = "Realtime door state, manual validation and push registration"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Geofence endpoints
        super::geofence::get_geofence,
        super::geofence::toggle_geofence,
        super::geofence::poll_geofence,
        // Location endpoints
        super::location::report_location,
        super::location::deliver_batch,
        // Door endpoints
        super::door::get_door,
        super::door::relay_event,
        super::door::validate_code,
        super::door::register_push_token,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Geofence types
            GeofenceResponse,
            GeofenceState,
            GeofenceStatus,
            PollPhase,
            ToggleRequest,
            ToggleOutcome,
            PollOutcome,
            Decision,
            GeofenceNotice,
            // Location types
            GeoCoordinate,
            LocationReport,
            LocationAccepted,
            LocationBatch,
            BatchResponse,
            PermissionStatus,
            BackgroundUpdateOptions,
            // Door types
            DoorSnapshot,
            DoorEventRequest,
            DoorEventResponse,
            ValidateCodeRequest,
            ValidationResult,
            AuthorizationResult,
            PushTokenRequest,
            PushTokenResponse,
            PushRegistration,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "geogate API");
        assert!(spec.paths.paths.contains_key("/api/geofence/toggle"));
        assert!(spec.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"geogate API\""));
    }
}
