//! Persistence of the logged-in user's credential.
//!
//! Storage follows the browser local-storage contract: string keys, string
//! values, durable across restarts. The session is kept as cleartext JSON
//! under [`SESSION_KEY`]; anyone who can read the storage file can read the
//! token. No expiry is enforced here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// The single key the session lives under.
pub const SESSION_KEY: &str = "loggedBloggedAppUser";

/// Username/password pair sent to the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Proof of an authenticated user, as returned by login and as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A durable string key-value store.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

// ── File-backed storage ───────────────────────────────────────────────────────

/// Key-value storage kept as a JSON object in a single file.
///
/// Every operation re-reads the file so separate processes sharing it see
/// each other's writes.
pub struct LocalStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Cannot read storage {}", self.path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt storage file {}", self.path.display()))
    }

    /// Writes atomically via a sibling temp file + rename so a crash mid-write
    /// never truncates the store.
    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(map)?)
            .with_context(|| format!("Cannot write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Cannot replace {}", self.path.display()))
    }
}

impl Storage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_map()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ── In-memory storage ─────────────────────────────────────────────────────────

/// Non-durable storage, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.remove(key);
        Ok(())
    }
}

impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        (**self).remove_item(key)
    }
}

// ── Session store ─────────────────────────────────────────────────────────────

/// Saves, restores and forgets the [`Session`] under [`SESSION_KEY`].
pub struct SessionStore {
    storage: Box<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.storage.set_item(SESSION_KEY, &json)
    }

    /// A stored value that no longer decodes is treated as no session.
    pub fn load(&self) -> Result<Option<Session>> {
        let Some(raw) = self.storage.get_item(SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable stored session: {}", e);
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove_item(SESSION_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session() -> Session {
        Session {
            username: "mluukkai".into(),
            token: "abc123".into(),
            name: Some("Matti".into()),
        }
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        SessionStore::new(LocalStorage::new(&path)).save(&session()).unwrap();

        let reopened = SessionStore::new(LocalStorage::new(&path));
        assert_eq!(reopened.load().unwrap(), Some(session()));
    }

    #[test]
    fn stored_value_is_plain_json_under_fixed_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("nested/storage.json"));
        SessionStore::new(LocalStorage::new(storage.path())).save(&session()).unwrap();

        let raw = storage.get_item(SESSION_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["username"], "mluukkai");
        assert_eq!(value["token"], "abc123");
    }

    #[test]
    fn clear_removes_only_the_session() {
        let storage = Arc::new(MemoryStorage::default());
        storage.set_item("theme", "dark").unwrap();
        let store = SessionStore::new(Arc::clone(&storage));

        store.save(&session()).unwrap();
        store.clear().unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert_eq!(storage.get_item("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn missing_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(LocalStorage::new(dir.path().join("absent.json")));
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn undecodable_session_is_ignored() {
        let storage = Arc::new(MemoryStorage::default());
        storage.set_item(SESSION_KEY, "{not json").unwrap();
        assert_eq!(SessionStore::new(storage).load().unwrap(), None);
    }
}
