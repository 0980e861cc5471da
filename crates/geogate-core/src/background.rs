//! Background location task.
//!
//! When the app is not visible, the platform delivers batches of positions
//! to a registered task instead of the engine polling. The task runs in its
//! own execution context, so it reads everything it needs (enabled flag,
//! device id, rate-limit window) from the settings store on every batch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::error::Result;
use crate::gatekeeper::{Decision, GeofenceGatekeeper, DEVICE_NOT_AUTHORIZED_MESSAGE};
use crate::location::{LocationAccuracy, LocationProvider, LocationSample};

/// Name the background task is registered under.
pub const BACKGROUND_TASK_NAME: &str = "door-unlock-background";

/// Minimum time between background deliveries.
pub const BACKGROUND_TIME_INTERVAL_MS: u64 = 30_000;

/// Minimum movement between background deliveries.
pub const BACKGROUND_DISTANCE_INTERVAL_METERS: f64 = 10.0;

/// How the platform should schedule background deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackgroundUpdateOptions {
    /// Requested fix precision.
    pub accuracy: LocationAccuracy,
    /// Minimum time between deliveries.
    pub time_interval_ms: u64,
    /// Minimum movement between deliveries.
    pub distance_interval_meters: f64,
    /// Title of the persistent notification shown while tracking.
    pub notification_title: String,
    /// Body of the persistent notification shown while tracking.
    pub notification_body: String,
}

impl Default for BackgroundUpdateOptions {
    fn default() -> Self {
        Self {
            accuracy: LocationAccuracy::Balanced,
            time_interval_ms: BACKGROUND_TIME_INTERVAL_MS,
            distance_interval_meters: BACKGROUND_DISTANCE_INTERVAL_METERS,
            notification_title: "Door auto-unlock".to_string(),
            notification_body: "Monitoring location to unlock the door automatically".to_string(),
        }
    }
}

/// Platform task scheduler for background location updates.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Whether `task_name` is currently receiving updates.
    async fn is_registered(&self, task_name: &str) -> Result<bool>;

    /// Start delivering updates to `task_name`.
    async fn start_location_updates(
        &self,
        task_name: &str,
        options: &BackgroundUpdateOptions,
    ) -> Result<()>;

    /// Stop delivering updates to `task_name`. Stopping an unknown task is a no-op.
    async fn stop_location_updates(&self, task_name: &str) -> Result<()>;
}

/// Scheduler that only keeps a registry; the host delivers batches itself
/// and consults [`InProcessScheduler::options`] to decide whether to.
#[derive(Debug, Clone, Default)]
pub struct InProcessScheduler {
    tasks: Arc<RwLock<HashMap<String, BackgroundUpdateOptions>>>,
}

impl InProcessScheduler {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options `task_name` was registered with, if registered.
    pub async fn options(&self, task_name: &str) -> Option<BackgroundUpdateOptions> {
        self.tasks.read().await.get(task_name).cloned()
    }
}

#[async_trait]
impl BackgroundScheduler for InProcessScheduler {
    async fn is_registered(&self, task_name: &str) -> Result<bool> {
        Ok(self.tasks.read().await.contains_key(task_name))
    }

    async fn start_location_updates(
        &self,
        task_name: &str,
        options: &BackgroundUpdateOptions,
    ) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task_name.to_string(), options.clone());
        Ok(())
    }

    async fn stop_location_updates(&self, task_name: &str) -> Result<()> {
        self.tasks.write().await.remove(task_name);
        Ok(())
    }
}

/// Result of [`BackgroundTask::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BackgroundStart {
    /// Updates were started.
    Started,
    /// Updates were already running.
    AlreadyRunning,
    /// The persisted flag is off.
    Disabled,
    /// No device identifier is stored.
    NoDevice,
    /// The server refused the device; the geofence was disabled.
    Unauthorized {
        /// Server explanation.
        message: String,
    },
    /// Background location permission was refused.
    PermissionDenied,
}

/// The background location task and its registration.
#[derive(Clone)]
pub struct BackgroundTask {
    gatekeeper: GeofenceGatekeeper,
    location: Arc<dyn LocationProvider>,
    scheduler: Arc<dyn BackgroundScheduler>,
    clock: Arc<dyn Clock>,
    options: BackgroundUpdateOptions,
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BackgroundTask {
    /// Create a task with default scheduling options.
    pub fn new(
        gatekeeper: GeofenceGatekeeper,
        location: Arc<dyn LocationProvider>,
        scheduler: Arc<dyn BackgroundScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gatekeeper,
            location,
            scheduler,
            clock,
            options: BackgroundUpdateOptions::default(),
        }
    }

    /// Override scheduling options.
    #[must_use]
    pub fn with_options(mut self, options: BackgroundUpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Scheduling options in use.
    #[must_use]
    pub const fn options(&self) -> &BackgroundUpdateOptions {
        &self.options
    }

    /// Whether the task is registered with the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be queried.
    pub async fn is_running(&self) -> Result<bool> {
        self.scheduler.is_registered(BACKGROUND_TASK_NAME).await
    }

    /// Register for background updates if the geofence is on and allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if settings, the server, the permission query or the
    /// scheduler fail.
    pub async fn start(&self) -> Result<BackgroundStart> {
        let settings = self.gatekeeper.settings();
        if !settings.geofence_enabled().await? {
            return Ok(BackgroundStart::Disabled);
        }

        let Some(device_id) = settings.device_id().await? else {
            return Ok(BackgroundStart::NoDevice);
        };

        let auth = self
            .gatekeeper
            .door_api()
            .check_geo_authorization(&device_id)
            .await?;
        if !auth.authorized {
            let message = auth.message_or(DEVICE_NOT_AUTHORIZED_MESSAGE).to_string();
            info!(message = %message, "Device not authorized for background geolocation");
            settings.set_geofence_enabled(false).await?;
            return Ok(BackgroundStart::Unauthorized { message });
        }

        if !self
            .location
            .request_background_permission()
            .await?
            .is_granted()
        {
            return Ok(BackgroundStart::PermissionDenied);
        }

        self.register().await
    }

    /// Register with the scheduler, skipping the enable checks.
    ///
    /// For callers that already verified the flag, authorization and
    /// background permission. Does nothing if the task is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler fails.
    pub async fn register(&self) -> Result<BackgroundStart> {
        if self.is_running().await? {
            return Ok(BackgroundStart::AlreadyRunning);
        }

        self.scheduler
            .start_location_updates(BACKGROUND_TASK_NAME, &self.options)
            .await?;
        info!(
            task = BACKGROUND_TASK_NAME,
            time_interval_ms = self.options.time_interval_ms,
            distance_interval_meters = self.options.distance_interval_meters,
            "Background location updates started"
        );
        Ok(BackgroundStart::Started)
    }

    /// Unregister from background updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler fails.
    pub async fn stop(&self) -> Result<()> {
        self.scheduler
            .stop_location_updates(BACKGROUND_TASK_NAME)
            .await?;
        debug!(task = BACKGROUND_TASK_NAME, "Background location updates stopped");
        Ok(())
    }

    /// Task callback for one delivery.
    ///
    /// Only the first location of a batch is evaluated. Failures are logged
    /// and swallowed; this never returns an error to the task runner.
    pub async fn handle_batch(
        &self,
        locations: &[LocationSample],
        task_error: Option<&str>,
    ) -> Option<Decision> {
        if let Some(task_error) = task_error {
            error!(error = %task_error, "Error in background location task");
            return None;
        }

        let first = locations.first()?;

        match self.evaluate(first).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "Background auto-validation failed");
                None
            }
        }
    }

    async fn evaluate(&self, sample: &LocationSample) -> Result<Option<Decision>> {
        if !self.gatekeeper.settings().geofence_enabled().await? {
            debug!("Geofence disabled, ignoring background batch");
            return Ok(None);
        }

        let decision = self
            .gatekeeper
            .evaluate_and_maybe_trigger(sample.coordinate, self.clock.now_millis())
            .await?;

        match &decision {
            Decision::Unauthorized { .. } => {
                if let Err(e) = self.stop().await {
                    warn!(error = %e, "Failed to stop background updates after revocation");
                }
            }
            other => debug!(decision = ?other, "Background batch evaluated"),
        }

        Ok(Some(decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoCoordinate, DOOR_LOCATION};
    use crate::gatekeeper::MIN_UNLOCK_INTERVAL_MS;
    use crate::location::PermissionStatus;
    use crate::mock::{FakeDoorApi, FakeLocationProvider, ManualClock};
    use crate::settings::{MemorySettingsStore, Settings, DEVICE_ID_KEY, GEO_ENABLED_KEY};

    struct Harness {
        task: BackgroundTask,
        api: Arc<FakeDoorApi>,
        scheduler: Arc<InProcessScheduler>,
        clock: Arc<ManualClock>,
        settings: Settings,
    }

    fn harness(api: FakeDoorApi, background: PermissionStatus, enabled: bool) -> Harness {
        let api = Arc::new(api);
        let store = MemorySettingsStore::with_entries([
            (DEVICE_ID_KEY, "device-1"),
            (GEO_ENABLED_KEY, if enabled { "true" } else { "false" }),
        ]);
        let settings = Settings::new(Arc::new(store));
        let gatekeeper = GeofenceGatekeeper::new(api.clone(), settings.clone());
        let location = Arc::new(FakeLocationProvider::new(
            PermissionStatus::Granted,
            background,
        ));
        let scheduler = Arc::new(InProcessScheduler::new());
        let clock = Arc::new(ManualClock::new(1_750_000_000_000));
        let task = BackgroundTask::new(gatekeeper, location, scheduler.clone(), clock.clone());
        Harness {
            task,
            api,
            scheduler,
            clock,
            settings,
        }
    }

    fn at(coordinate: GeoCoordinate) -> LocationSample {
        LocationSample::now(coordinate)
    }

    #[tokio::test]
    async fn test_start_registers_with_balanced_options() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);

        assert_eq!(h.task.start().await.unwrap(), BackgroundStart::Started);
        let options = h.scheduler.options(BACKGROUND_TASK_NAME).await.unwrap();
        assert_eq!(options.accuracy, LocationAccuracy::Balanced);
        assert_eq!(options.time_interval_ms, 30_000);
        assert!((options.distance_interval_meters - 10.0).abs() < f64::EPSILON);

        assert_eq!(h.task.start().await.unwrap(), BackgroundStart::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_register_skips_server_and_permission_checks() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Denied, true);

        assert_eq!(h.task.register().await.unwrap(), BackgroundStart::Started);
        assert_eq!(h.task.register().await.unwrap(), BackgroundStart::AlreadyRunning);
        assert_eq!(h.api.authorization_calls(), 0);
        assert!(h.task.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_start_requires_enabled_flag() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, false);
        assert_eq!(h.task.start().await.unwrap(), BackgroundStart::Disabled);
        assert!(!h.task.is_running().await.unwrap());
        assert_eq!(h.api.authorization_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_with_revoked_device_disables() {
        let h = harness(
            FakeDoorApi::ready().unauthorized("Revoked"),
            PermissionStatus::Granted,
            true,
        );
        assert_eq!(
            h.task.start().await.unwrap(),
            BackgroundStart::Unauthorized {
                message: "Revoked".to_string()
            }
        );
        assert!(!h.settings.geofence_enabled().await.unwrap());
        assert!(!h.task.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_start_without_background_permission() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Denied, true);
        assert_eq!(h.task.start().await.unwrap(), BackgroundStart::PermissionDenied);
        assert!(!h.task.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_at_door_validates_and_persists_window() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);

        let decision = h.task.handle_batch(&[at(DOOR_LOCATION)], None).await;
        assert!(matches!(decision, Some(Decision::Validated { .. })));
        assert_eq!(h.api.validate_with_geo_calls(), 1);
        assert_eq!(
            h.settings.last_unlock_millis().await.unwrap(),
            h.clock.now_millis()
        );
    }

    #[tokio::test]
    async fn test_only_first_location_counts() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);
        let far = GeoCoordinate::new(DOOR_LOCATION.latitude + 0.01, DOOR_LOCATION.longitude);

        let decision = h
            .task
            .handle_batch(&[at(far), at(DOOR_LOCATION)], None)
            .await;
        assert!(matches!(decision, Some(Decision::OutOfRange { .. })));
        assert_eq!(h.api.validate_with_geo_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_across_batches() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);
        h.api.keep_validation_needed(true);

        h.task.handle_batch(&[at(DOOR_LOCATION)], None).await;
        h.clock.advance(30_000);
        let decision = h.task.handle_batch(&[at(DOOR_LOCATION)], None).await;
        assert!(matches!(decision, Some(Decision::RateLimited { .. })));
        assert_eq!(h.api.validate_with_geo_calls(), 1);

        h.clock.advance(MIN_UNLOCK_INTERVAL_MS);
        let decision = h.task.handle_batch(&[at(DOOR_LOCATION)], None).await;
        assert!(matches!(decision, Some(Decision::Validated { .. })));
        assert_eq!(h.api.validate_with_geo_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_and_task_error_are_ignored() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);

        assert_eq!(h.task.handle_batch(&[], None).await, None);
        assert_eq!(
            h.task
                .handle_batch(&[at(DOOR_LOCATION)], Some("location services off"))
                .await,
            None
        );
        assert_eq!(h.api.validation_needed_calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_flag_ignores_batches() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, false);
        assert_eq!(h.task.handle_batch(&[at(DOOR_LOCATION)], None).await, None);
        assert_eq!(h.api.validate_with_geo_calls(), 0);
    }

    #[tokio::test]
    async fn test_network_errors_are_swallowed() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);
        h.api.fail_requests(true);

        assert_eq!(h.task.handle_batch(&[at(DOOR_LOCATION)], None).await, None);
        assert_eq!(h.settings.last_unlock_millis().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revocation_during_batch_unregisters() {
        let h = harness(FakeDoorApi::ready(), PermissionStatus::Granted, true);
        h.task.start().await.unwrap();
        h.api.set_authorized(false, Some("Revoked"));

        let decision = h.task.handle_batch(&[at(DOOR_LOCATION)], None).await;
        assert!(matches!(decision, Some(Decision::Unauthorized { .. })));
        assert!(!h.task.is_running().await.unwrap());
        assert!(!h.settings.geofence_enabled().await.unwrap());
    }
}
