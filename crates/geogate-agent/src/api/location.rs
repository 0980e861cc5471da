//! Location bridge API endpoints.
//!
//! The platform bridge reports foreground fixes here, and delivers
//! background batches the way an OS task scheduler would.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use geogate_core::{Decision, GeoCoordinate, LocationSample};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the location router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(report_location))
        .route("/batch", post(deliver_batch))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A position reported by the bridge.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 51.3142398877287,
    "longitude": 16.91470516047976
}))]
pub struct LocationReport {
    /// Degrees, -90 to 90.
    #[schema(example = 51.314_239_887_728_7)]
    pub latitude: f64,

    /// Degrees, -180 to 180.
    #[schema(example = 16.914_705_160_479_76)]
    pub longitude: f64,

    /// When the fix was taken. Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationReport {
    fn into_sample(self) -> ApiResult<LocationSample> {
        let valid = self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        if !valid {
            return Err(ApiError::bad_request(
                "invalid_coordinate",
                format!(
                    "Coordinate ({}, {}) is out of range",
                    self.latitude, self.longitude
                ),
            ));
        }

        Ok(LocationSample {
            coordinate: GeoCoordinate::new(self.latitude, self.longitude),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// Response after recording a foreground fix.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "distance_meters": 12.5 }))]
pub struct LocationAccepted {
    /// Distance from the reported position to the door.
    #[schema(example = 12.5)]
    pub distance_meters: f64,
}

/// A background delivery.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "locations": [{ "latitude": 51.3142398877287, "longitude": 16.91470516047976 }],
    "error": null
}))]
pub struct LocationBatch {
    /// Positions in delivery order. Only the first is evaluated.
    #[serde(default)]
    pub locations: Vec<LocationReport>,

    /// Task-level error reported by the scheduler.
    pub error: Option<String>,
}

/// Result of a background delivery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchResponse {
    /// Whether the batch reached the gatekeeper.
    #[schema(example = true)]
    pub processed: bool,

    /// What the gatekeeper decided.
    pub decision: Option<Decision>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Report the current foreground position.
#[utoipa::path(
    post,
    path = "/api/location",
    tag = "location",
    operation_id = "reportLocation",
    summary = "Report a foreground fix",
    description = "Stores the position the next poll tick will use. Does not \
        trigger validation by itself.",
    request_body = LocationReport,
    responses(
        (status = 200, description = "Position stored", body = LocationAccepted),
        (status = 400, description = "Coordinate out of range", body = super::error::ErrorResponse)
    )
)]
pub async fn report_location(
    State(state): State<SharedState>,
    Json(report): Json<LocationReport>,
) -> ApiResult<Json<LocationAccepted>> {
    let sample = report.into_sample()?;
    let distance_meters = state
        .engine()
        .gatekeeper()
        .distance_to_door(sample.coordinate);
    state.location().report(sample).await;
    debug!(distance_meters, "Foreground fix reported");

    Ok(Json(LocationAccepted { distance_meters }))
}

/// Deliver a background location batch.
#[utoipa::path(
    post,
    path = "/api/location/batch",
    tag = "location",
    operation_id = "deliverLocationBatch",
    summary = "Deliver a background batch",
    description = "Hands a batch to the background task. Only accepted while the task \
        is registered, which happens when the geofence is enabled with background \
        permission. Evaluation failures are logged, never returned.",
    request_body = LocationBatch,
    responses(
        (status = 200, description = "Batch handled", body = BatchResponse),
        (status = 400, description = "First coordinate out of range", body = super::error::ErrorResponse),
        (status = 409, description = "Background task not registered", body = super::error::ErrorResponse)
    )
)]
pub async fn deliver_batch(
    State(state): State<SharedState>,
    Json(batch): Json<LocationBatch>,
) -> ApiResult<Json<BatchResponse>> {
    if !state.background_registered().await? {
        return Err(ApiError::Conflict {
            error_code: "background_task_not_registered".to_string(),
            message: "The background location task is not running".to_string(),
        });
    }

    // Only the first entry is evaluated.
    let samples = batch
        .locations
        .into_iter()
        .next()
        .map(LocationReport::into_sample)
        .transpose()?
        .into_iter()
        .collect::<Vec<_>>();

    let decision = state
        .engine()
        .background()
        .handle_batch(&samples, batch.error.as_deref())
        .await;

    Ok(Json(BatchResponse {
        processed: decision.is_some(),
        decision,
    }))
}
