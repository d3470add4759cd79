use crate::channel::Channel;
use crate::identity::{is_valid, normalize};
use crate::PRODUCT_NAME;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key of the primary saved-connection record.
pub const PRIMARY_KEY: &str = "saved_connection";
/// Legacy key holding the bare remote ID. Owned by an older consumer.
pub const LEGACY_REMOTE_ID_KEY: &str = "remote_id";
/// Legacy key whose presence means the older consumer once held a token.
pub const LEGACY_TOKEN_KEY: &str = "access_token";
/// Version placeholder for records migrated from the legacy layout.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Durable string key/value storage.
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// The last connection that completed a full handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub remote_id: String,
    pub name: String,
    pub version: String,
    pub channel: Channel,
    /// Unix seconds
    pub last_connected_at: i64,
}

impl SavedConnection {
    /// Record synthesized from the legacy layout: its channel is a placeholder
    /// until a live handshake reports the real version.
    pub fn needs_channel_check(&self) -> bool {
        self.version == UNKNOWN_VERSION
    }
}

/// Reads and writes the single saved connection.
#[derive(Clone)]
pub struct ConnectionStore {
    storage: Arc<dyn Storage>,
}

impl ConnectionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Overwrite the saved connection and mirror the bare id to the legacy key.
    pub fn save(&self, connection: &SavedConnection) -> Result<()> {
        let json = serde_json::to_string(connection)?;
        self.storage
            .set(PRIMARY_KEY, &json)
            .context("failed to write saved connection")?;
        self.storage
            .set(LEGACY_REMOTE_ID_KEY, &connection.remote_id)
            .context("failed to write legacy remote id")?;
        log::info!(
            "Saved connection to {} ({}, {})",
            connection.remote_id,
            connection.version,
            connection.channel
        );
        Ok(())
    }

    /// Load the saved connection, falling back to the legacy layout.
    pub fn load(&self) -> Option<SavedConnection> {
        if let Some(saved) = self.load_primary() {
            return Some(saved);
        }
        self.load_legacy()
    }

    /// Remove the primary record. Legacy keys belong to another consumer.
    pub fn clear(&self) -> Result<()> {
        self.storage
            .remove(PRIMARY_KEY)
            .context("failed to remove saved connection")
    }

    fn load_primary(&self) -> Option<SavedConnection> {
        let raw = match self.storage.get(PRIMARY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to read saved connection: {:#}", e);
                return None;
            }
        };
        match serde_json::from_str::<SavedConnection>(&raw) {
            Ok(saved) if is_valid(&saved.remote_id) => Some(saved),
            Ok(saved) => {
                log::warn!(
                    "Ignoring saved connection with invalid remote id {:?}",
                    saved.remote_id
                );
                None
            }
            Err(e) => {
                log::warn!("Ignoring unparsable saved connection: {}", e);
                None
            }
        }
    }

    fn load_legacy(&self) -> Option<SavedConnection> {
        let read = |key: &str| match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read legacy key {}: {:#}", key, e);
                None
            }
        };
        let remote_id = read(LEGACY_REMOTE_ID_KEY)?;
        let token = read(LEGACY_TOKEN_KEY)?;
        if token.is_empty() || !is_valid(&remote_id) {
            return None;
        }
        // TODO: validate the legacy token before treating it as proof of a past connection.
        log::info!("Migrating legacy connection {}", normalize(&remote_id));
        Some(SavedConnection {
            remote_id: normalize(&remote_id),
            name: format!("{} Server", PRODUCT_NAME),
            version: UNKNOWN_VERSION.to_string(),
            channel: Channel::Stable,
            last_connected_at: 0,
        })
    }
}

/// In-process storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Key/value storage backed by one JSON object file.
pub struct JsonFileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config_dir>/tether/storage.json`
    pub fn default_location() -> Self {
        Self::new(crate::config::config_dir().join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a JSON object of strings", self.path.display()))
    }

    fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.lock.lock();

        let mut entries = self.read_entries().unwrap_or_else(|e| {
            log::warn!("Starting from empty storage: {:#}", e);
            BTreeMap::new()
        });
        updater(&mut entries);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "ABCDEFGHIJKLMNOPQRSTUVWXY2";

    fn memory_store() -> (Arc<MemoryStorage>, ConnectionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = ConnectionStore::new(storage.clone());
        (storage, store)
    }

    fn sample() -> SavedConnection {
        SavedConnection {
            remote_id: ID.to_string(),
            name: "Living Room".to_string(),
            version: "2.2.0b1".to_string(),
            channel: Channel::Beta,
            last_connected_at: 1_737_980_000,
        }
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let (_, store) = memory_store();
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), Some(sample()));
    }

    #[test]
    fn save_writes_legacy_id() {
        let (storage, store) = memory_store();
        store.save(&sample()).unwrap();
        assert_eq!(storage.get(LEGACY_REMOTE_ID_KEY).unwrap().as_deref(), Some(ID));
    }

    #[test]
    fn load_empty_is_none() {
        let (_, store) = memory_store();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn malformed_primary_is_treated_as_absent() {
        let (storage, store) = memory_store();
        storage.set(PRIMARY_KEY, "{not json").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn primary_with_invalid_id_is_treated_as_absent() {
        let (storage, store) = memory_store();
        let mut bad = sample();
        bad.remote_id = "short".to_string();
        storage
            .set(PRIMARY_KEY, &serde_json::to_string(&bad).unwrap())
            .unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn legacy_pair_is_migrated_as_placeholder() {
        let (storage, store) = memory_store();
        storage.set(LEGACY_REMOTE_ID_KEY, "abcde-fghij-klmno-pqrst-uvwxy-2").unwrap();
        storage.set(LEGACY_TOKEN_KEY, "tok").unwrap();

        let saved = store.load().unwrap();
        assert_eq!(saved.remote_id, ID);
        assert_eq!(saved.channel, Channel::Stable);
        assert_eq!(saved.version, UNKNOWN_VERSION);
        assert!(saved.needs_channel_check());
    }

    #[test]
    fn legacy_without_token_is_ignored() {
        let (storage, store) = memory_store();
        storage.set(LEGACY_REMOTE_ID_KEY, ID).unwrap();
        assert_eq!(store.load(), None);
        storage.set(LEGACY_TOKEN_KEY, "").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn legacy_with_invalid_id_is_ignored() {
        let (storage, store) = memory_store();
        storage.set(LEGACY_REMOTE_ID_KEY, "nope").unwrap();
        storage.set(LEGACY_TOKEN_KEY, "tok").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn malformed_primary_falls_back_to_legacy() {
        let (storage, store) = memory_store();
        storage.set(PRIMARY_KEY, "garbage").unwrap();
        storage.set(LEGACY_REMOTE_ID_KEY, ID).unwrap();
        storage.set(LEGACY_TOKEN_KEY, "tok").unwrap();
        assert!(store.load().unwrap().needs_channel_check());
    }

    #[test]
    fn clear_keeps_legacy_keys() {
        let (storage, store) = memory_store();
        storage.set(LEGACY_TOKEN_KEY, "tok").unwrap();
        store.save(&sample()).unwrap();
        store.clear().unwrap();

        assert_eq!(storage.get(PRIMARY_KEY).unwrap(), None);
        assert_eq!(storage.get(LEGACY_REMOTE_ID_KEY).unwrap().as_deref(), Some(ID));
        assert_eq!(storage.get(LEGACY_TOKEN_KEY).unwrap().as_deref(), Some("tok"));
    }

    #[test]
    fn json_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = ConnectionStore::new(Arc::new(JsonFileStorage::new(&path)));
        store.save(&sample()).unwrap();

        let reopened = ConnectionStore::new(Arc::new(JsonFileStorage::new(&path)));
        assert_eq!(reopened.load(), Some(sample()));
    }

    #[test]
    fn json_file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("storage.json"));
        assert_eq!(storage.get(PRIMARY_KEY).unwrap(), None);
        storage.remove(PRIMARY_KEY).unwrap();
        assert!(!storage.path().exists());
    }

    #[test]
    fn json_file_storage_corrupt_file_does_not_break_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "][").unwrap();

        let storage = Arc::new(JsonFileStorage::new(&path));
        assert!(storage.get(PRIMARY_KEY).is_err());

        let store = ConnectionStore::new(storage.clone());
        assert_eq!(store.load(), None);

        store.save(&sample()).unwrap();
        assert_eq!(store.load(), Some(sample()));
    }

    #[cfg(unix)]
    #[test]
    fn json_file_storage_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("storage.json"));
        storage.set("k", "v").unwrap();
        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
