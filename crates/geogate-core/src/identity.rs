//! Per-installation device identity.
//!
//! The identifier is generated once, persisted under
//! [`DEVICE_ID_KEY`](crate::settings::DEVICE_ID_KEY) and reused for the
//! lifetime of the install. The server authorizes auto-unlock per identifier.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::settings::Settings;

/// A persisted, non-empty device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    device_id: String,
}

impl DeviceIdentity {
    /// Return the stored identity, generating and persisting one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read or written.
    pub async fn get_or_create(settings: &Settings) -> Result<Self> {
        if let Some(device_id) = settings.device_id().await? {
            return Ok(Self { device_id });
        }

        let device_id = generate_device_id();
        settings.set_device_id(&device_id).await?;
        info!(device_id = %device_id, "Generated new device identifier");
        Ok(Self { device_id })
    }

    /// Return the stored identity without generating one.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub async fn load(settings: &Settings) -> Result<Option<Self>> {
        Ok(settings
            .device_id()
            .await?
            .map(|device_id| Self { device_id }))
    }

    /// The identifier string sent to the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.device_id
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.device_id)
    }
}

/// `{os}-{arch}-{uuid}-{epoch_ms}`.
fn generate_device_id() -> String {
    format!(
        "{}-{}-{}-{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        Uuid::new_v4().simple(),
        Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsStore, DEVICE_ID_KEY};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_generated_once_and_reused() {
        let settings = Settings::new(Arc::new(MemorySettingsStore::new()));

        assert!(DeviceIdentity::load(&settings).await.unwrap().is_none());

        let first = DeviceIdentity::get_or_create(&settings).await.unwrap();
        let second = DeviceIdentity::get_or_create(&settings).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.as_str().is_empty());
        assert_eq!(
            DeviceIdentity::load(&settings).await.unwrap(),
            Some(first.clone())
        );
    }

    #[tokio::test]
    async fn test_existing_identity_is_kept() {
        let store = MemorySettingsStore::with_entries([(DEVICE_ID_KEY, "Google-Pixel 7-GVU6C")]);
        let settings = Settings::new(Arc::new(store));

        let identity = DeviceIdentity::get_or_create(&settings).await.unwrap();
        assert_eq!(identity.as_str(), "Google-Pixel 7-GVU6C");
        assert_eq!(identity.to_string(), "Google-Pixel 7-GVU6C");
    }

    #[tokio::test]
    async fn test_blank_identity_is_replaced() {
        let store = MemorySettingsStore::with_entries([(DEVICE_ID_KEY, "")]);
        let settings = Settings::new(Arc::new(store));

        let identity = DeviceIdentity::get_or_create(&settings).await.unwrap();
        assert!(!identity.as_str().is_empty());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_device_id(), generate_device_id());
    }
}
