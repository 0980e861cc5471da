//! Scheduler-agnostic auto-validation decisions.
//!
//! Foreground polling and the background location task both hand a position
//! to [`GeofenceGatekeeper::evaluate_and_maybe_trigger`]. Every trigger path
//! therefore goes through the same sequence:
//!
//! 1. distance to the door, compared against the radius
//! 2. the persisted rate-limit window, read fresh
//! 3. the validation-needed flag, queried fresh
//! 4. the device's authorization, queried fresh
//! 5. the `validate-with-geo` request
//!
//! The persisted `last_geo_unlock_time` is the single source of truth for
//! rate limiting. Two writers racing on it at worst cost one redundant check.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::door::{DoorApi, ValidationResult};
use crate::error::Result;
use crate::geo::{distance, is_within_radius, GeoCoordinate, DOOR_LOCATION, GEOFENCE_RADIUS_METERS};
use crate::settings::Settings;

/// Minimum time between two auto-validations, in milliseconds.
pub const MIN_UNLOCK_INTERVAL_MS: i64 = 120_000;

/// Message returned when the door is not waiting for a code.
pub const VALIDATION_NOT_NEEDED_MESSAGE: &str = "validation not needed";

/// Message returned when the server refuses the device.
pub const DEVICE_NOT_AUTHORIZED_MESSAGE: &str = "device not authorized";

/// Fixed geofence geometry and rate limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatekeeperParams {
    /// Door position.
    pub door: GeoCoordinate,
    /// Geofence radius in meters; positions strictly inside trigger.
    pub radius_meters: f64,
    /// Minimum interval between auto-validations.
    pub min_unlock_interval_ms: i64,
}

impl Default for GatekeeperParams {
    fn default() -> Self {
        Self {
            door: DOOR_LOCATION,
            radius_meters: GEOFENCE_RADIUS_METERS,
            min_unlock_interval_ms: MIN_UNLOCK_INTERVAL_MS,
        }
    }
}

/// What the gatekeeper decided for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Outside the geofence; nothing was checked remotely.
    OutOfRange {
        /// Distance to the door.
        distance_meters: f64,
    },
    /// Inside, but the last auto-validation is too recent.
    RateLimited {
        /// Distance to the door.
        distance_meters: f64,
        /// Time until the window reopens.
        retry_in_ms: i64,
    },
    /// Inside, but no device identifier is stored.
    NoDevice {
        /// Distance to the door.
        distance_meters: f64,
    },
    /// Inside, but the door is not waiting for a code.
    ValidationNotNeeded {
        /// Distance to the door.
        distance_meters: f64,
    },
    /// Inside, but the server refused the device. The geofence was disabled.
    Unauthorized {
        /// Distance to the door.
        distance_meters: f64,
        /// Server explanation.
        message: String,
    },
    /// The server accepted the auto-validation.
    Validated {
        /// Distance to the door.
        distance_meters: f64,
        /// Server message.
        message: Option<String>,
    },
    /// The server answered the auto-validation with `success: false`.
    Rejected {
        /// Distance to the door.
        distance_meters: f64,
        /// Server message.
        message: Option<String>,
    },
}

impl Decision {
    /// Distance that led to this decision.
    #[must_use]
    pub const fn distance_meters(&self) -> f64 {
        match self {
            Self::OutOfRange { distance_meters }
            | Self::RateLimited {
                distance_meters, ..
            }
            | Self::NoDevice { distance_meters }
            | Self::ValidationNotNeeded { distance_meters }
            | Self::Unauthorized {
                distance_meters, ..
            }
            | Self::Validated {
                distance_meters, ..
            }
            | Self::Rejected {
                distance_meters, ..
            } => *distance_meters,
        }
    }

    /// Whether the position was inside the geofence.
    #[must_use]
    pub const fn is_near_door(&self) -> bool {
        !matches!(self, Self::OutOfRange { .. })
    }

    /// Whether the `validate-with-geo` request was sent.
    #[must_use]
    pub const fn triggered(&self) -> bool {
        matches!(self, Self::Validated { .. } | Self::Rejected { .. })
    }
}

/// Outcome of the auto-validation precondition chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoValidation {
    /// The door is not waiting for a code.
    NotNeeded,
    /// The server refused the device.
    Unauthorized(String),
    /// The request was sent; this is the server's answer.
    Completed(ValidationResult),
}

/// Shared decision logic for both scheduling modes.
#[derive(Clone)]
pub struct GeofenceGatekeeper {
    door_api: Arc<dyn DoorApi>,
    settings: Settings,
    params: GatekeeperParams,
}

impl std::fmt::Debug for GeofenceGatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceGatekeeper")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl GeofenceGatekeeper {
    /// Create a gatekeeper with the built-in door, radius and rate limit.
    pub fn new(door_api: Arc<dyn DoorApi>, settings: Settings) -> Self {
        Self::with_params(door_api, settings, GatekeeperParams::default())
    }

    /// Create a gatekeeper with explicit parameters.
    pub const fn with_params(
        door_api: Arc<dyn DoorApi>,
        settings: Settings,
        params: GatekeeperParams,
    ) -> Self {
        Self {
            door_api,
            settings,
            params,
        }
    }

    /// Geometry and rate limit in use.
    #[must_use]
    pub const fn params(&self) -> &GatekeeperParams {
        &self.params
    }

    /// Door server client.
    #[must_use]
    pub fn door_api(&self) -> &Arc<dyn DoorApi> {
        &self.door_api
    }

    /// Settings store.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Distance from `location` to the door.
    #[must_use]
    pub fn distance_to_door(&self, location: GeoCoordinate) -> f64 {
        distance(location, self.params.door)
    }

    /// Time left in the rate-limit window, `None` when a trigger is allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted timestamp cannot be read.
    pub async fn rate_limit_remaining(&self, now_millis: i64) -> Result<Option<i64>> {
        let last = self.settings.last_unlock_millis().await?;
        let elapsed = now_millis.saturating_sub(last);
        if elapsed > self.params.min_unlock_interval_ms {
            Ok(None)
        } else {
            Ok(Some(self.params.min_unlock_interval_ms - elapsed))
        }
    }

    /// Run the precondition chain and, if it passes, submit the validation.
    ///
    /// Both checks are made against the server at call time.
    ///
    /// # Errors
    ///
    /// Returns an error if any server call fails.
    pub async fn run_auto_validation(&self, device_id: &str) -> Result<AutoValidation> {
        if !self.door_api.check_validation_needed().await? {
            return Ok(AutoValidation::NotNeeded);
        }

        let auth = self.door_api.check_geo_authorization(device_id).await?;
        if !auth.authorized {
            return Ok(AutoValidation::Unauthorized(
                auth.message_or(DEVICE_NOT_AUTHORIZED_MESSAGE).to_string(),
            ));
        }

        let result = self.door_api.validate_with_geo(device_id).await?;
        Ok(AutoValidation::Completed(result))
    }

    /// Auto-validate `device_id`, reporting refusals as `success: false`.
    ///
    /// # Errors
    ///
    /// Returns an error if any server call fails.
    pub async fn auto_validate(&self, device_id: &str) -> Result<ValidationResult> {
        Ok(match self.run_auto_validation(device_id).await? {
            AutoValidation::NotNeeded => ValidationResult::refused(VALIDATION_NOT_NEEDED_MESSAGE),
            AutoValidation::Unauthorized(_) => {
                ValidationResult::refused(DEVICE_NOT_AUTHORIZED_MESSAGE)
            }
            AutoValidation::Completed(result) => result,
        })
    }

    /// Decide what to do for a device at `location` at time `now_millis`.
    ///
    /// Side effects: a refusal persists `enabled=false`; a successful
    /// validation persists `now_millis` as the last unlock time.
    ///
    /// # Errors
    ///
    /// Returns an error if a server call or settings access fails. Nothing is
    /// persisted in that case.
    pub async fn evaluate_and_maybe_trigger(
        &self,
        location: GeoCoordinate,
        now_millis: i64,
    ) -> Result<Decision> {
        let distance_meters = self.distance_to_door(location);
        if !is_within_radius(distance_meters, self.params.radius_meters) {
            debug!(distance_meters, "Outside geofence");
            return Ok(Decision::OutOfRange { distance_meters });
        }

        if let Some(retry_in_ms) = self.rate_limit_remaining(now_millis).await? {
            debug!(distance_meters, retry_in_ms, "Inside geofence but rate limited");
            return Ok(Decision::RateLimited {
                distance_meters,
                retry_in_ms,
            });
        }

        let Some(device_id) = self.settings.device_id().await? else {
            warn!("Inside geofence but no device identifier is stored");
            return Ok(Decision::NoDevice { distance_meters });
        };

        match self.run_auto_validation(&device_id).await? {
            AutoValidation::NotNeeded => Ok(Decision::ValidationNotNeeded { distance_meters }),
            AutoValidation::Unauthorized(message) => {
                warn!(device_id = %device_id, message = %message, "Device no longer authorized, disabling geofence");
                self.settings.set_geofence_enabled(false).await?;
                Ok(Decision::Unauthorized {
                    distance_meters,
                    message,
                })
            }
            AutoValidation::Completed(result) if result.success => {
                self.settings.record_unlock(now_millis).await?;
                info!(device_id = %device_id, distance_meters, "Door auto-validated by location");
                Ok(Decision::Validated {
                    distance_meters,
                    message: result.message,
                })
            }
            AutoValidation::Completed(result) => {
                warn!(device_id = %device_id, message = ?result.message, "Server rejected auto-validation");
                Ok(Decision::Rejected {
                    distance_meters,
                    message: result.message,
                })
            }
        }
    }
}
