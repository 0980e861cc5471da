//! Platform location access.
//!
//! The engine never talks to a GPS stack directly. It goes through
//! [`LocationProvider`], which covers permission queries, permission prompts
//! and single position fixes. [`ReportedLocationProvider`] is the
//! implementation used by the agent: a platform bridge pushes positions in,
//! and the engine reads the freshest one back out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::geo::GeoCoordinate;

/// Outcome of a location permission query or prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Access allowed.
    Granted,
    /// Access refused.
    Denied,
    /// The user has not been asked yet.
    Undetermined,
}

impl PermissionStatus {
    /// Whether access is allowed.
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Requested precision of a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocationAccuracy {
    /// Best available; used by foreground polling.
    Highest,
    /// Battery-friendly; used by background updates.
    Balanced,
}

/// A single position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationSample {
    /// Where the device was.
    pub coordinate: GeoCoordinate,

    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    /// A sample taken now.
    #[must_use]
    pub fn now(coordinate: GeoCoordinate) -> Self {
        Self {
            coordinate,
            timestamp: Utc::now(),
        }
    }
}

/// Access to the platform location service.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current foreground permission, without prompting.
    async fn foreground_permission(&self) -> Result<PermissionStatus>;

    /// Prompt for foreground permission.
    async fn request_foreground_permission(&self) -> Result<PermissionStatus>;

    /// Prompt for background permission.
    async fn request_background_permission(&self) -> Result<PermissionStatus>;

    /// Take one position fix.
    async fn current_position(&self, accuracy: LocationAccuracy) -> Result<LocationSample>;
}

/// Location provider fed by an external bridge.
///
/// Permissions are fixed at construction: the bridge already asked the user.
/// Prompting for an undetermined permission resolves it as denied, since
/// nothing here can show a dialog.
#[derive(Debug, Clone)]
pub struct ReportedLocationProvider {
    foreground: PermissionStatus,
    background: PermissionStatus,
    latest: Arc<RwLock<Option<LocationSample>>>,
}

impl ReportedLocationProvider {
    /// Create a provider with the given permissions and no position yet.
    #[must_use]
    pub fn new(foreground: PermissionStatus, background: PermissionStatus) -> Self {
        Self {
            foreground,
            background,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Record a new position from the bridge.
    pub async fn report(&self, sample: LocationSample) {
        *self.latest.write().await = Some(sample);
    }

    /// The most recently reported position.
    pub async fn latest(&self) -> Option<LocationSample> {
        *self.latest.read().await
    }
}

const fn resolve_prompt(status: PermissionStatus) -> PermissionStatus {
    match status {
        PermissionStatus::Granted => PermissionStatus::Granted,
        PermissionStatus::Denied | PermissionStatus::Undetermined => PermissionStatus::Denied,
    }
}

#[async_trait]
impl LocationProvider for ReportedLocationProvider {
    async fn foreground_permission(&self) -> Result<PermissionStatus> {
        Ok(self.foreground)
    }

    async fn request_foreground_permission(&self) -> Result<PermissionStatus> {
        Ok(resolve_prompt(self.foreground))
    }

    async fn request_background_permission(&self) -> Result<PermissionStatus> {
        Ok(resolve_prompt(self.background))
    }

    async fn current_position(&self, _accuracy: LocationAccuracy) -> Result<LocationSample> {
        if !self.foreground.is_granted() {
            return Err(Error::LocationPermissionDenied);
        }
        self.latest()
            .await
            .ok_or_else(|| Error::LocationUnavailable("no position reported yet".into()))
    }
}
