//! Realtime door-state channel.
//!
//! The door pushes frames over a realtime socket. The transport lives
//! outside this crate; it hands each `(event, payload)` frame to
//! [`DoorStateTracker::handle_frame`], which keeps the latest
//! [`DoorSnapshot`] for anyone watching.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::door::DoorApi;
use crate::error::{Error, Result};

/// Door lock state changed; payload is an integer, `1` meaning unlocked.
pub const DOOR_STATE_CHANGED_EVENT: &str = "esp32:door-state-changed";

/// Reply to a state query; same payload as [`DOOR_STATE_CHANGED_EVENT`].
pub const DOOR_STATE_RESPONSE_EVENT: &str = "esp32:doorState-response";

/// Validation-needed flag changed; payload is a boolean.
pub const VALIDATION_STATE_CHANGED_EVENT: &str = "esp32:validation-state-changed";

/// Emitted by the client right after connecting to ask for the door state.
pub const CHECK_DOORS_STATE_EVENT: &str = "esp32:checkDoorsState";

/// Transport connected (or reconnected).
pub const CONNECT_EVENT: &str = "connect";

/// Transport disconnected.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// A parsed realtime frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorEvent {
    /// The transport connected.
    Connected,
    /// The transport dropped.
    Disconnected,
    /// The lock changed state.
    DoorStateChanged {
        /// Whether the door is unlocked.
        unlocked: bool,
    },
    /// Answer to [`CHECK_DOORS_STATE_EVENT`].
    DoorStateResponse {
        /// Whether the door is unlocked.
        unlocked: bool,
    },
    /// The door started or stopped waiting for a code.
    ValidationStateChanged {
        /// Whether a code is needed.
        needed: bool,
    },
}

impl DoorEvent {
    /// Parse a frame. Unknown event names yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if a known event carries a payload of the wrong type.
    pub fn parse(event: &str, payload: &Value) -> Result<Option<Self>> {
        let parsed = match event {
            CONNECT_EVENT => Self::Connected,
            DISCONNECT_EVENT => Self::Disconnected,
            DOOR_STATE_CHANGED_EVENT => Self::DoorStateChanged {
                unlocked: door_state(event, payload)?,
            },
            DOOR_STATE_RESPONSE_EVENT => Self::DoorStateResponse {
                unlocked: door_state(event, payload)?,
            },
            VALIDATION_STATE_CHANGED_EVENT => Self::ValidationStateChanged {
                needed: payload
                    .as_bool()
                    .ok_or_else(|| invalid_payload(event, payload))?,
            },
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

fn door_state(event: &str, payload: &Value) -> Result<bool> {
    payload
        .as_i64()
        .map(|state| state == 1)
        .ok_or_else(|| invalid_payload(event, payload))
}

fn invalid_payload(event: &str, payload: &Value) -> Error {
    Error::InvalidResponse {
        endpoint: event.to_string(),
        message: format!("unexpected payload {payload}"),
    }
}

/// Latest known door state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DoorSnapshot {
    /// Whether the realtime channel is up.
    pub connected: bool,
    /// Whether the door is unlocked.
    pub doors_unlocked: bool,
    /// Whether the door is waiting for a code.
    pub validation_needed: bool,
}

/// Folds realtime frames into a [`DoorSnapshot`].
#[derive(Clone)]
pub struct DoorStateTracker {
    door_api: Arc<dyn DoorApi>,
    snapshot: Arc<watch::Sender<DoorSnapshot>>,
}

impl std::fmt::Debug for DoorStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorStateTracker")
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}

impl DoorStateTracker {
    /// Create a tracker with everything unknown (all `false`).
    pub fn new(door_api: Arc<dyn DoorApi>) -> Self {
        let (snapshot, _) = watch::channel(DoorSnapshot::default());
        Self {
            door_api,
            snapshot: Arc::new(snapshot),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DoorSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch for changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DoorSnapshot> {
        self.snapshot.subscribe()
    }

    /// Parse and apply one frame. Returns the parsed event, or `None` if the
    /// event name is not one the door sends.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or, on connect, the
    /// validation-needed query fails.
    pub async fn handle_frame(&self, event: &str, payload: &Value) -> Result<Option<DoorEvent>> {
        let Some(parsed) = DoorEvent::parse(event, payload)? else {
            debug!(event = %event, "Ignoring unknown door event");
            return Ok(None);
        };
        self.apply(parsed).await?;
        Ok(Some(parsed))
    }

    /// Apply a parsed event.
    ///
    /// # Errors
    ///
    /// Returns an error if, on connect, the validation-needed query fails.
    /// The connection is still recorded in that case.
    pub async fn apply(&self, event: DoorEvent) -> Result<()> {
        match event {
            DoorEvent::Connected => {
                info!("Door channel connected");
                self.snapshot.send_modify(|s| s.connected = true);
                match self.door_api.check_validation_needed().await {
                    Ok(needed) => self.snapshot.send_modify(|s| s.validation_needed = needed),
                    Err(e) => {
                        warn!(error = %e, "Failed to seed validation state");
                        return Err(e);
                    }
                }
            }
            DoorEvent::Disconnected => {
                info!("Door channel disconnected");
                self.snapshot.send_modify(|s| s.connected = false);
            }
            DoorEvent::DoorStateChanged { unlocked } | DoorEvent::DoorStateResponse { unlocked } => {
                self.snapshot.send_modify(|s| s.doors_unlocked = unlocked);
            }
            DoorEvent::ValidationStateChanged { needed } => {
                self.snapshot.send_modify(|s| s.validation_needed = needed);
            }
        }
        Ok(())
    }
}
