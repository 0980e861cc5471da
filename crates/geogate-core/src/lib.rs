//! # geogate-core
//!
//! Core logic for location-based door auto-validation.
//!
//! A device that comes within 100 meters of the door while the door is
//! waiting for a code validates itself against the door server, at most once
//! every two minutes, provided the server authorizes the device.
//!
//! ## Architecture
//!
//! - [`geo`] - Haversine distance and the door geofence
//! - [`door`] - HTTP client for the door server
//! - [`gatekeeper`] - The decision shared by every trigger path
//! - [`engine`] - Enable/disable lifecycle and the foreground polling loop
//! - [`background`] - The background location task and its scheduler seam
//! - [`location`] - Location permissions and position fixes
//! - [`events`] - Realtime door-state frames
//! - [`push`] - Push token registration
//! - [`identity`] - Per-installation device identifier
//! - [`settings`] / [`storage`] - Persisted key-value settings
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod background;
pub mod clock;
pub mod config;
pub mod door;
pub mod engine;
pub mod error;
pub mod events;
pub mod gatekeeper;
pub mod geo;
pub mod identity;
pub mod location;
pub mod push;
pub mod settings;
pub mod storage;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export primary types for convenience
pub use background::{
    BackgroundScheduler, BackgroundStart, BackgroundTask, BackgroundUpdateOptions,
    InProcessScheduler, BACKGROUND_TASK_NAME,
};
pub use clock::{Clock, SystemClock};
pub use config::{
    ApiConfig, ConfigError, ConfigResult, GeofenceConfig, GeogateConfig, LocationConfig,
    ServerConfig, StorageConfig,
};
pub use door::{AuthorizationResult, DoorApi, DoorClientError, HttpDoorClient, ValidationResult};
pub use engine::{
    EngineParams, GeofenceEngine, GeofenceNotice, GeofenceState, GeofenceStatus, PollOutcome,
    PollPhase, ToggleOutcome, POLL_INTERVAL_MS,
};
pub use error::{Error, GeogateError, Result};
pub use events::{DoorEvent, DoorSnapshot, DoorStateTracker};
pub use gatekeeper::{Decision, GatekeeperParams, GeofenceGatekeeper, MIN_UNLOCK_INTERVAL_MS};
pub use geo::{distance, GeoCoordinate, DOOR_LOCATION, GEOFENCE_RADIUS_METERS};
pub use identity::DeviceIdentity;
pub use location::{
    LocationAccuracy, LocationProvider, LocationSample, PermissionStatus, ReportedLocationProvider,
};
pub use push::{PushRegistrar, PushRegistration, ServerPushRegistrar};
pub use settings::{MemorySettingsStore, Settings, SettingsError, SettingsStore};
pub use storage::{default_data_dir, default_settings_path, FileSettingsStore};
