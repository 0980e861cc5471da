//! File-backed settings store.
//!
//! All settings live in a single JSON object file shared with the background
//! task host. Reads go to the file every time. Writes re-read and update one
//! key while holding an exclusive lock on `settings.json.lock`, then replace
//! the file from a uniquely named temp file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::settings::{SettingsError, SettingsResult, SettingsStore};

/// File name of the settings file inside the data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Get the default data directory.
///
/// On Linux: `/var/lib/geogate/`
/// Elsewhere: the platform data dir, e.g. `~/Library/Application Support/geogate/`
///
/// # Errors
///
/// Returns an error if the platform data directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/geogate"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "geogate").ok_or_else(|| {
            crate::error::Error::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Default path of the settings file.
///
/// # Errors
///
/// Returns an error if the platform data directory cannot be determined.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(SETTINGS_FILE_NAME))
}

/// One keyed change applied under the file lock.
enum Change {
    Set(String, String),
    Remove(String),
}

/// Settings persisted as a JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store in `data_dir` using [`SETTINGS_FILE_NAME`].
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(SETTINGS_FILE_NAME))
    }

    /// Store at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform data directory cannot be determined.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_settings_path()?))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock file guarding writes.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    async fn load(&self) -> SettingsResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse(&self.path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(SettingsError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn apply(&self, change: Change) -> SettingsResult<()> {
        let path = self.path.clone();
        let lock_path = self.lock_path();
        tokio::task::spawn_blocking(move || apply_locked(&path, &lock_path, change))
            .await
            .map_err(|e| SettingsError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }
}

fn parse(path: &Path, content: &str) -> SettingsResult<BTreeMap<String, String>> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(content).map_err(|source| SettingsError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Read-modify-write of one key, with the lock file held for the whole cycle.
fn apply_locked(path: &Path, lock_path: &Path, change: Change) -> SettingsResult<()> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(io_err)?;
    lock.lock().map_err(io_err)?;

    let mut values = match std::fs::read_to_string(path) {
        Ok(content) => parse(path, &content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(io_err(e)),
    };

    let changed = match change {
        Change::Set(key, value) => values.insert(key, value.clone()).as_ref() != Some(&value),
        Change::Remove(key) => values.remove(&key).is_some(),
    };
    if changed {
        write_replace(path, dir, &values)?;
        debug!(path = %path.display(), keys = values.len(), "Settings saved");
    }

    release(&lock);
    Ok(())
}

fn write_replace(path: &Path, dir: &Path, values: &BTreeMap<String, String>) -> SettingsResult<()> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let content = serde_json::to_string_pretty(values).map_err(|source| SettingsError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn release(lock: &File) {
    // Dropping the handle releases the lock too.
    if let Err(e) = lock.unlock() {
        debug!(error = %e, "Settings lock release failed");
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: &str) -> SettingsResult<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        self.apply(Change::Set(key.to_string(), value.to_string()))
            .await
    }

    async fn remove(&self, key: &str) -> SettingsResult<()> {
        self.apply(Change::Remove(key.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Settings, GEO_ENABLED_KEY};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::in_dir(dir.path());
        assert_eq!(store.get(GEO_ENABLED_KEY).await.unwrap(), None);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("data");

        let store = FileSettingsStore::in_dir(&nested);
        store.set(GEO_ENABLED_KEY, "true").await.unwrap();
        store.set("device_unique_id", "abc").await.unwrap();

        let reopened = Settings::new(Arc::new(FileSettingsStore::in_dir(&nested)));
        assert!(reopened.geofence_enabled().await.unwrap());
        assert_eq!(reopened.device_id().await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_two_handles_see_each_other() {
        let dir = TempDir::new().unwrap();
        let foreground = FileSettingsStore::in_dir(dir.path());
        let background = FileSettingsStore::in_dir(dir.path());

        background.set("last_geo_unlock_time", "42").await.unwrap();
        assert_eq!(
            foreground.get("last_geo_unlock_time").await.unwrap(),
            Some("42".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_key() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::in_dir(dir.path());
        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, SettingsError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_drop_other_keys() {
        let dir = TempDir::new().unwrap();
        let foreground = FileSettingsStore::in_dir(dir.path());
        let background = FileSettingsStore::in_dir(dir.path());

        foreground.set(GEO_ENABLED_KEY, "true").await.unwrap();
        assert_eq!(background.get(GEO_ENABLED_KEY).await.unwrap().as_deref(), Some("true"));

        foreground.set(GEO_ENABLED_KEY, "false").await.unwrap();
        background.set("last_geo_unlock_time", "42").await.unwrap();

        let settings = Settings::new(Arc::new(FileSettingsStore::in_dir(dir.path())));
        assert!(!settings.geofence_enabled().await.unwrap());
        assert_eq!(settings.last_unlock_millis().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_every_key() {
        let dir = TempDir::new().unwrap();
        let mut writers = Vec::new();
        for i in 0..16 {
            let store = FileSettingsStore::in_dir(dir.path());
            writers.push(tokio::spawn(async move {
                store.set(&format!("key-{i}"), &i.to_string()).await
            }));
        }
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let store = FileSettingsStore::in_dir(dir.path());
        for i in 0..16 {
            assert_eq!(
                store.get(&format!("key-{i}")).await.unwrap(),
                Some(i.to_string())
            );
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != SETTINGS_FILE_NAME && name != "settings.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_default_settings_path_ends_with_file_name() {
        let path = default_settings_path().unwrap();
        assert!(path.ends_with(SETTINGS_FILE_NAME));
    }
}
