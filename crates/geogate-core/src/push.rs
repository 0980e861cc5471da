//! Push token registration.
//!
//! Token acquisition belongs to the platform. This module only tells the
//! door server which token reaches this device, and remembers the last
//! accepted token so an unchanged token is not sent twice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::door::DoorApi;
use crate::error::Result;
use crate::identity::DeviceIdentity;
use crate::settings::Settings;

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PushRegistration {
    /// The server accepted the token.
    Registered,
    /// The token was already registered; nothing was sent.
    AlreadyRegistered,
    /// The server answered `success: false`.
    Rejected,
}

/// Registers push tokens for this device.
#[async_trait]
pub trait PushRegistrar: Send + Sync {
    /// Register `push_token`.
    async fn register(&self, push_token: &str) -> Result<PushRegistration>;
}

/// [`PushRegistrar`] backed by the door server.
#[derive(Clone)]
pub struct ServerPushRegistrar {
    door_api: Arc<dyn DoorApi>,
    settings: Settings,
}

impl std::fmt::Debug for ServerPushRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPushRegistrar").finish_non_exhaustive()
    }
}

impl ServerPushRegistrar {
    /// Create a registrar.
    pub fn new(door_api: Arc<dyn DoorApi>, settings: Settings) -> Self {
        Self { door_api, settings }
    }
}

#[async_trait]
impl PushRegistrar for ServerPushRegistrar {
    async fn register(&self, push_token: &str) -> Result<PushRegistration> {
        if self.settings.push_token_registered().await?.as_deref() == Some(push_token) {
            return Ok(PushRegistration::AlreadyRegistered);
        }

        let identity = DeviceIdentity::get_or_create(&self.settings).await?;
        if self
            .door_api
            .register_push_token(push_token, identity.as_str())
            .await?
        {
            self.settings.set_push_token_registered(push_token).await?;
            info!(device_id = %identity, "Push token registered");
            Ok(PushRegistration::Registered)
        } else {
            warn!(device_id = %identity, "Server rejected push token");
            Ok(PushRegistration::Rejected)
        }
    }
}
