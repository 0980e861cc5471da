//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use geogate_core::{
    BackgroundScheduler, BackgroundTask, Clock, DeviceIdentity, DoorApi, DoorStateTracker,
    EngineParams, FileSettingsStore, GeofenceEngine, GeofenceGatekeeper, GeogateConfig,
    HttpDoorClient, InProcessScheduler, PushRegistrar, ReportedLocationProvider,
    ServerPushRegistrar, Settings, SettingsStore, SystemClock, BACKGROUND_TASK_NAME,
};
use tracing::info;

/// Handle type extracted by every handler.
pub type SharedState = AppState;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: GeogateConfig,
    device: DeviceIdentity,
    settings: Settings,
    door_api: Arc<dyn DoorApi>,
    location: ReportedLocationProvider,
    scheduler: InProcessScheduler,
    engine: GeofenceEngine,
    tracker: DoorStateTracker,
    push: Arc<dyn PushRegistrar>,
}

impl AppState {
    /// Build state from configuration: HTTP door client, file-backed settings
    /// and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the door client, data directory or settings store
    /// cannot be set up.
    pub async fn new(config: GeogateConfig) -> anyhow::Result<Self> {
        let door_api = Arc::new(HttpDoorClient::from_config(&config.api)?);
        let store = FileSettingsStore::in_dir(config.data_dir()?);
        info!(path = %store.path().display(), "Using settings file");

        Self::with_components(config, door_api, Arc::new(store), Arc::new(SystemClock)).await
    }

    /// Build state around explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the device identity cannot be loaded or persisted,
    /// or the persisted geofence flag cannot be read.
    pub async fn with_components(
        config: GeogateConfig,
        door_api: Arc<dyn DoorApi>,
        store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let settings = Settings::new(store);
        let device = DeviceIdentity::get_or_create(&settings).await?;
        info!(device_id = %device, "Device identity loaded");

        let location = ReportedLocationProvider::new(
            config.location.foreground_permission,
            config.location.background_permission,
        );
        let scheduler = InProcessScheduler::new();

        let gatekeeper = GeofenceGatekeeper::new(door_api.clone(), settings.clone());
        let background = BackgroundTask::new(
            gatekeeper.clone(),
            Arc::new(location.clone()),
            Arc::new(scheduler.clone()),
            clock.clone(),
        );
        let engine = GeofenceEngine::new(
            gatekeeper,
            Arc::new(location.clone()),
            background,
            clock,
            EngineParams {
                poll_interval: Duration::from_millis(config.geofence.poll_interval_ms),
            },
        );
        engine.initialize().await?;

        let tracker = DoorStateTracker::new(door_api.clone());
        let push = Arc::new(ServerPushRegistrar::new(door_api.clone(), settings.clone()));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                device,
                settings,
                door_api,
                location,
                scheduler,
                engine,
                tracker,
                push,
            }),
        })
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &GeogateConfig {
        &self.inner.config
    }

    /// This installation's device identifier.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    /// Persisted settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Door server client.
    #[must_use]
    pub fn door_api(&self) -> &Arc<dyn DoorApi> {
        &self.inner.door_api
    }

    /// Location provider fed by `POST /api/location`.
    #[must_use]
    pub fn location(&self) -> &ReportedLocationProvider {
        &self.inner.location
    }

    /// The geofence engine.
    #[must_use]
    pub fn engine(&self) -> &GeofenceEngine {
        &self.inner.engine
    }

    /// Realtime door state.
    #[must_use]
    pub fn tracker(&self) -> &DoorStateTracker {
        &self.inner.tracker
    }

    /// Push token registrar.
    #[must_use]
    pub fn push(&self) -> &Arc<dyn PushRegistrar> {
        &self.inner.push
    }

    /// Whether the background task is registered and should receive batches.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be queried.
    pub async fn background_registered(&self) -> geogate_core::Result<bool> {
        self.inner.scheduler.is_registered(BACKGROUND_TASK_NAME).await
    }
}
