//! Foreground geofence engine.
//!
//! [`GeofenceEngine`] owns the enable/disable lifecycle and the polling loop
//! that runs while the app is visible:
//!
//! ```text
//! Disabled -> Enabling -> Enabled -> Disabled | Unauthorized
//!                            |
//!                            +-- Idle -> Sampling -> Evaluating -> Idle
//!                                                        |
//!                                                        +-> Triggering -> Idle
//! ```
//!
//! The engine is a cheap clonable handle. The polling task holds only a weak
//! reference, so dropping the last handle stops it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::background::BackgroundTask;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::gatekeeper::{Decision, GeofenceGatekeeper, DEVICE_NOT_AUTHORIZED_MESSAGE};
use crate::geo::is_within_radius;
use crate::location::{LocationAccuracy, LocationProvider, PermissionStatus};

/// Foreground poll interval in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 30_000;

/// Generic failure for one-shot calls that hit a transient error.
pub const TOGGLE_FAILED_MESSAGE: &str = "could not change geolocation settings";

const NOTICE_CAPACITY: usize = 16;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceStatus {
    /// Not monitoring.
    Disabled,
    /// A toggle is checking its gates.
    Enabling,
    /// Polling.
    Enabled,
    /// The server revoked the device mid-session.
    Unauthorized,
}

/// Position inside one polling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    /// Between ticks.
    Idle,
    /// Waiting for a location fix.
    Sampling,
    /// Comparing the fix against the geofence.
    Evaluating,
    /// Inside the geofence, running auto-validation.
    Triggering,
}

/// Observable engine state. In-memory only; lost when the engine is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeofenceState {
    /// Lifecycle state.
    pub status: GeofenceStatus,
    /// Whether monitoring is on.
    pub enabled: bool,
    /// Whether the last fix was inside the geofence.
    pub is_near_door: bool,
    /// Distance at the last fix; `None` until the first successful fix.
    pub distance_meters: Option<f64>,
    /// Last failure recorded by a tick or toggle.
    pub last_error: Option<String>,
    /// Position inside the current tick.
    pub phase: PollPhase,
    /// What the last completed evaluation decided.
    pub last_decision: Option<Decision>,
    /// When the last fix was taken.
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl GeofenceState {
    const fn new(enabled: bool) -> Self {
        Self {
            status: if enabled {
                GeofenceStatus::Enabled
            } else {
                GeofenceStatus::Disabled
            },
            enabled,
            is_near_door: false,
            distance_meters: None,
            last_error: None,
            phase: PollPhase::Idle,
            last_decision: None,
            last_sample_at: None,
        }
    }
}

/// User-facing events raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum GeofenceNotice {
    /// The door was auto-validated.
    AutoValidated {
        /// Server message.
        message: Option<String>,
    },
    /// Background permission was refused; monitoring runs only while visible.
    ForegroundOnly,
    /// The server revoked the device and monitoring was turned off.
    AuthorizationRevoked {
        /// Server explanation.
        message: String,
    },
}

/// Result of [`GeofenceEngine::toggle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ToggleOutcome {
    /// Whether the requested state was reached.
    pub success: bool,
    /// Whether monitoring is on afterwards.
    pub enabled: bool,
    /// Why the toggle failed, or a degraded-mode note.
    pub message: Option<String>,
    /// Background permission was refused.
    pub foreground_only: bool,
}

impl ToggleOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            enabled: false,
            message: Some(message.into()),
            foreground_only: false,
        }
    }
}

/// Result of one polling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Monitoring is off.
    Skipped,
    /// No device identifier is stored.
    NoDevice,
    /// The door is not waiting for a code; no fix was taken.
    ValidationNotNeeded,
    /// The server revoked the device; monitoring was turned off.
    Unauthorized {
        /// Server explanation.
        message: String,
    },
    /// A fix was taken and evaluated.
    Evaluated {
        /// What the gatekeeper decided.
        decision: Decision,
    },
    /// A step failed; the loop keeps running.
    Failed {
        /// Failure description, also stored in `last_error`.
        error: String,
    },
}

/// Tunables for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
    /// Time between polling ticks.
    pub poll_interval: Duration,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        }
    }
}

struct Poller {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    gatekeeper: GeofenceGatekeeper,
    location: Arc<dyn LocationProvider>,
    background: BackgroundTask,
    clock: Arc<dyn Clock>,
    params: EngineParams,
    state: RwLock<GeofenceState>,
    poller: Mutex<Option<Poller>>,
    toggle_lock: Mutex<()>,
    notices: broadcast::Sender<GeofenceNotice>,
}

/// Handle to the foreground geofence engine.
#[derive(Clone)]
pub struct GeofenceEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for GeofenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceEngine")
            .field("params", &self.inner.params)
            .finish_non_exhaustive()
    }
}

impl GeofenceEngine {
    /// Create an engine in the `Disabled` state.
    ///
    /// Call [`GeofenceEngine::initialize`] to hydrate the persisted flag.
    pub fn new(
        gatekeeper: GeofenceGatekeeper,
        location: Arc<dyn LocationProvider>,
        background: BackgroundTask,
        clock: Arc<dyn Clock>,
        params: EngineParams,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                gatekeeper,
                location,
                background,
                clock,
                params,
                state: RwLock::new(GeofenceState::new(false)),
                poller: Mutex::new(None),
                toggle_lock: Mutex::new(()),
                notices,
            }),
        }
    }

    /// Load the persisted flag and resume polling if it was on.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub async fn initialize(&self) -> Result<()> {
        let enabled = self.inner.gatekeeper.settings().geofence_enabled().await?;
        *self.inner.state.write().await = GeofenceState::new(enabled);
        if enabled {
            info!("Geofence was enabled, resuming polling");
            self.start_polling().await;
        }
        Ok(())
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> GeofenceState {
        self.inner.state.read().await.clone()
    }

    /// Subscribe to user-facing notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GeofenceNotice> {
        self.inner.notices.subscribe()
    }

    /// The background task this engine registers.
    #[must_use]
    pub fn background(&self) -> &BackgroundTask {
        &self.inner.background
    }

    /// The shared decision logic.
    #[must_use]
    pub fn gatekeeper(&self) -> &GeofenceGatekeeper {
        &self.inner.gatekeeper
    }

    /// Whether the polling loop is scheduled.
    pub async fn is_polling(&self) -> bool {
        self.inner.poller.lock().await.is_some()
    }

    /// Turn monitoring on or off.
    ///
    /// Calls are serialized. Each gate prompts for a permission at most once.
    pub async fn toggle(&self, requested: bool) -> ToggleOutcome {
        let _guard = self.inner.toggle_lock.lock().await;
        if requested {
            self.enable().await
        } else {
            self.disable().await
        }
    }

    /// Stop polling without touching the persisted flag.
    pub async fn shutdown(&self) {
        self.stop_polling().await;
    }

    async fn disable(&self) -> ToggleOutcome {
        self.stop_polling().await;
        if let Err(e) = self.inner.background.stop().await {
            warn!(error = %e, "Failed to stop background updates");
        }

        let persisted = self
            .inner
            .gatekeeper
            .settings()
            .set_geofence_enabled(false)
            .await;

        let mut state = self.inner.state.write().await;
        state.status = GeofenceStatus::Disabled;
        state.enabled = false;
        state.is_near_door = false;
        state.phase = PollPhase::Idle;

        match persisted {
            Ok(()) => {
                info!("Geofence disabled");
                ToggleOutcome {
                    success: true,
                    enabled: false,
                    message: None,
                    foreground_only: false,
                }
            }
            Err(e) => {
                error!(error = %e, "Geofence disabled but the flag could not be persisted");
                state.last_error = Some(e.to_string());
                ToggleOutcome {
                    success: true,
                    enabled: false,
                    message: Some(e.to_string()),
                    foreground_only: false,
                }
            }
        }
    }

    async fn enable(&self) -> ToggleOutcome {
        let previous = {
            let mut state = self.inner.state.write().await;
            let previous = state.status;
            state.status = GeofenceStatus::Enabling;
            previous
        };

        match self.check_enable_gates().await {
            Ok(background) => self.finish_enable(background).await,
            Err(Error::NotAuthorized(message)) if previous == GeofenceStatus::Enabled => {
                // The gate already persisted `false`; bring the running session in line.
                if let Err(e) = self.revoke(&message).await {
                    error!(error = %e, "Failed to disable geofence after revocation");
                }
                ToggleOutcome::failed(message)
            }
            Err(e) => {
                let message = if e.is_transient() {
                    warn!(error = %e, "Enabling geofence failed");
                    TOGGLE_FAILED_MESSAGE.to_string()
                } else {
                    info!(error = %e, "Geofence not enabled");
                    match &e {
                        Error::NotAuthorized(message) => message.clone(),
                        other => other.to_string(),
                    }
                };

                let mut state = self.inner.state.write().await;
                state.status = if previous == GeofenceStatus::Enabled {
                    previous
                } else {
                    GeofenceStatus::Disabled
                };
                state.last_error = Some(message.clone());
                ToggleOutcome {
                    enabled: state.enabled,
                    ..ToggleOutcome::failed(message)
                }
            }
        }
    }

    /// Gates (a) to (d). Returns the background permission outcome.
    async fn check_enable_gates(&self) -> Result<PermissionStatus> {
        let settings = self.inner.gatekeeper.settings();

        let Some(device_id) = settings.device_id().await? else {
            return Err(Error::DeviceNotIdentified);
        };

        let auth = self
            .inner
            .gatekeeper
            .door_api()
            .check_geo_authorization(&device_id)
            .await?;
        if !auth.authorized {
            settings.set_geofence_enabled(false).await?;
            return Err(Error::NotAuthorized(
                auth.message_or(DEVICE_NOT_AUTHORIZED_MESSAGE).to_string(),
            ));
        }

        let mut foreground = self.inner.location.foreground_permission().await?;
        if foreground == PermissionStatus::Undetermined {
            foreground = self.inner.location.request_foreground_permission().await?;
        }
        if !foreground.is_granted() {
            return Err(Error::LocationPermissionDenied);
        }

        let background = match self.inner.location.request_background_permission().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Background permission request failed");
                PermissionStatus::Denied
            }
        };
        Ok(background)
    }

    async fn finish_enable(&self, background: PermissionStatus) -> ToggleOutcome {
        if let Err(e) = self
            .inner
            .gatekeeper
            .settings()
            .set_geofence_enabled(true)
            .await
        {
            error!(error = %e, "Failed to persist geofence flag");
            let mut state = self.inner.state.write().await;
            state.status = GeofenceStatus::Disabled;
            state.last_error = Some(e.to_string());
            return ToggleOutcome::failed(TOGGLE_FAILED_MESSAGE);
        }

        {
            let mut state = self.inner.state.write().await;
            state.status = GeofenceStatus::Enabled;
            state.enabled = true;
            state.last_error = None;
        }
        info!("Geofence enabled");
        self.start_polling().await;

        let foreground_only = !background.is_granted();
        if foreground_only {
            info!("Background location denied, monitoring in foreground only");
            let _ = self.inner.notices.send(GeofenceNotice::ForegroundOnly);
        } else {
            match self.inner.background.register().await {
                Ok(result) => debug!(result = ?result, "Background task start"),
                Err(e) => warn!(error = %e, "Failed to start background updates"),
            }
        }

        ToggleOutcome {
            success: true,
            enabled: true,
            message: foreground_only
                .then(|| "background location denied, monitoring only while open".to_string()),
            foreground_only,
        }
    }

    async fn start_polling(&self) {
        let mut poller = self.inner.poller.lock().await;
        if poller.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.params.poll_interval;
        let handle = tokio::spawn(run_poll_loop(weak, period, shutdown_rx));
        *poller = Some(Poller { shutdown, handle });
        debug!(interval_ms = period.as_millis(), "Polling started");
    }

    async fn stop_polling(&self) {
        if let Some(poller) = self.inner.poller.lock().await.take() {
            let _ = poller.shutdown.send(());
            // Detach: an in-flight tick may finish its writes.
            drop(poller.handle);
            debug!("Polling stopped");
        }
    }

    /// Run one polling tick now.
    pub async fn poll_once(&self) -> PollOutcome {
        if !self.inner.state.read().await.enabled {
            return PollOutcome::Skipped;
        }

        match self.poll_steps().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Geofence poll failed");
                let error = e.to_string();
                let mut state = self.inner.state.write().await;
                state.last_error = Some(error.clone());
                state.phase = PollPhase::Idle;
                PollOutcome::Failed { error }
            }
        }
    }

    async fn poll_steps(&self) -> Result<PollOutcome> {
        let gatekeeper = &self.inner.gatekeeper;
        let door_api = gatekeeper.door_api();

        let Some(device_id) = gatekeeper.settings().device_id().await? else {
            self.inner.state.write().await.last_error =
                Some(Error::DeviceNotIdentified.to_string());
            return Ok(PollOutcome::NoDevice);
        };

        if !door_api.check_validation_needed().await? {
            let mut state = self.inner.state.write().await;
            state.is_near_door = false;
            state.phase = PollPhase::Idle;
            return Ok(PollOutcome::ValidationNotNeeded);
        }

        let auth = door_api.check_geo_authorization(&device_id).await?;
        if !auth.authorized {
            let message = auth.message_or(DEVICE_NOT_AUTHORIZED_MESSAGE).to_string();
            self.revoke(&message).await?;
            return Ok(PollOutcome::Unauthorized { message });
        }

        self.inner.state.write().await.phase = PollPhase::Sampling;
        let sample = self
            .inner
            .location
            .current_position(LocationAccuracy::Highest)
            .await?;

        let distance_meters = gatekeeper.distance_to_door(sample.coordinate);
        let is_near_door = is_within_radius(distance_meters, gatekeeper.params().radius_meters);
        {
            let mut state = self.inner.state.write().await;
            state.distance_meters = Some(distance_meters);
            state.is_near_door = is_near_door;
            state.last_sample_at = Some(sample.timestamp);
            state.last_error = None;
            state.phase = if is_near_door {
                PollPhase::Triggering
            } else {
                PollPhase::Evaluating
            };
        }

        let decision = gatekeeper
            .evaluate_and_maybe_trigger(sample.coordinate, self.inner.clock.now_millis())
            .await?;

        {
            let mut state = self.inner.state.write().await;
            state.phase = PollPhase::Idle;
            state.last_decision = Some(decision.clone());
        }

        match &decision {
            Decision::Validated { message, .. } => {
                let _ = self.inner.notices.send(GeofenceNotice::AutoValidated {
                    message: message.clone(),
                });
            }
            Decision::Unauthorized { message, .. } => self.revoke(message).await?,
            Decision::Rejected { message, .. } => {
                self.inner.state.write().await.last_error = message.clone();
            }
            _ => {}
        }

        Ok(PollOutcome::Evaluated { decision })
    }

    /// Fail-safe for server-side revocation.
    async fn revoke(&self, message: &str) -> Result<()> {
        warn!(message = %message, "Device authorization revoked, disabling geofence");
        self.inner
            .gatekeeper
            .settings()
            .set_geofence_enabled(false)
            .await?;

        {
            let mut state = self.inner.state.write().await;
            state.status = GeofenceStatus::Unauthorized;
            state.enabled = false;
            state.is_near_door = false;
            state.phase = PollPhase::Idle;
            state.last_error = Some(message.to_string());
        }

        self.stop_polling().await;
        if let Err(e) = self.inner.background.stop().await {
            warn!(error = %e, "Failed to stop background updates");
        }
        let _ = self.inner.notices.send(GeofenceNotice::AuthorizationRevoked {
            message: message.to_string(),
        });
        Ok(())
    }
}

async fn run_poll_loop(
    engine: Weak<EngineInner>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        let Some(inner) = engine.upgrade() else {
            break;
        };
        let outcome = GeofenceEngine { inner }.poll_once().await;
        debug!(outcome = ?outcome, "Poll tick");
    }
}
