//! Persistent key-value settings.
//!
//! The store is the only mutable state shared between the foreground engine
//! and the background task. Access is plain get/set with no transactions, so
//! callers re-read values right before acting on them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Stored as `"true"` / `"false"`.
pub const GEO_ENABLED_KEY: &str = "geo_location_enabled";

/// Epoch milliseconds of the last successful auto-validation.
pub const LAST_UNLOCK_TIME_KEY: &str = "last_geo_unlock_time";

/// Opaque device identifier.
pub const DEVICE_ID_KEY: &str = "device_unique_id";

/// Last push token the server accepted.
pub const PUSH_TOKEN_REGISTERED_KEY: &str = "push_token_registered";

/// Errors raised by settings stores.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the backing file failed.
    #[error("Settings I/O failed for {}: {source}", path.display())]
    Io {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but is not a JSON string map.
    #[error("Settings file {} is corrupt: {source}", path.display())]
    Corrupt {
        /// Backing file path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored value could not be interpreted.
    #[error("Invalid value for '{key}': '{value}'")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Raw stored value.
        value: String,
    },
}

/// Result type for settings operations.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// String-keyed, string-valued durable store.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a value; `None` when the key has never been written.
    async fn get(&self, key: &str) -> SettingsResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> SettingsResult<()>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> SettingsResult<()>;
}

/// In-memory store. Survives nothing; used by tests and as a fallback.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySettingsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> SettingsResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> SettingsResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Typed view over a [`SettingsStore`].
///
/// Every accessor goes to the store; nothing is cached here.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    /// Wrap a store.
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Persisted geofence flag. Anything other than `"true"` reads as disabled.
    pub async fn geofence_enabled(&self) -> SettingsResult<bool> {
        Ok(self.store.get(GEO_ENABLED_KEY).await?.as_deref() == Some("true"))
    }

    /// Persist the geofence flag.
    pub async fn set_geofence_enabled(&self, enabled: bool) -> SettingsResult<()> {
        self.store
            .set(GEO_ENABLED_KEY, if enabled { "true" } else { "false" })
            .await
    }

    /// Epoch milliseconds of the last successful auto-validation, `0` if none.
    pub async fn last_unlock_millis(&self) -> SettingsResult<i64> {
        match self.store.get(LAST_UNLOCK_TIME_KEY).await? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| SettingsError::InvalidValue {
                    key: LAST_UNLOCK_TIME_KEY.to_string(),
                    value: raw,
                }),
        }
    }

    /// Persist the time of a successful auto-validation.
    pub async fn record_unlock(&self, now_millis: i64) -> SettingsResult<()> {
        self.store
            .set(LAST_UNLOCK_TIME_KEY, &now_millis.to_string())
            .await
    }

    /// Stored device identifier. Empty strings read as absent.
    pub async fn device_id(&self) -> SettingsResult<Option<String>> {
        Ok(self
            .store
            .get(DEVICE_ID_KEY)
            .await?
            .filter(|id| !id.trim().is_empty()))
    }

    /// Persist the device identifier.
    pub async fn set_device_id(&self, device_id: &str) -> SettingsResult<()> {
        self.store.set(DEVICE_ID_KEY, device_id).await
    }

    /// Push token last accepted by the server.
    pub async fn push_token_registered(&self) -> SettingsResult<Option<String>> {
        self.store.get(PUSH_TOKEN_REGISTERED_KEY).await
    }

    /// Remember the push token the server accepted.
    pub async fn set_push_token_registered(&self, token: &str) -> SettingsResult<()> {
        self.store.set(PUSH_TOKEN_REGISTERED_KEY, token).await
    }
}
