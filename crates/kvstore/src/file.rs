//! File-backed store
//!
//! Persists all entries in a single JSON file. Writes use atomic temp-file +
//! rename to prevent corruption on crash, and a tokio Mutex serializes
//! concurrent writers. Expirations are absolute unix millis so TTLs survive
//! restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::{KvStore, now_millis};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl Entry {
    fn expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-file JSON store.
///
/// The Mutex guards both the in-memory map and the file write, so readers
/// never observe a partially-applied update.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Entry>>,
}

impl FileStore {
    /// Load the store from `path`, creating an empty file if absent.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading state file: {e}")))?;
            let entries: HashMap<String, Entry> = serde_json::from_str(&contents)
                .map_err(|e| Error::Corrupt(format!("parsing state file: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "loaded state file");
            entries
        } else {
            info!(path = %path.display(), "state file not found, starting empty");
            let empty = HashMap::new();
            write_atomic(&path, &empty).await?;
            empty
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

#[async_trait::async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .get(key)
            .filter(|e| !e.expired(now_millis()))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| now_millis() + d.as_millis() as u64);
        let mut state = self.state.lock().await;
        state.insert(key.to_string(), Entry { value, expires_at });
        // Opportunistically drop entries that can never be read again
        let now = now_millis();
        state.retain(|_, e| !e.expired(now));
        write_atomic(&self.path, &state).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remove(key).is_some() {
            write_atomic(&self.path, &state).await?;
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let now = now_millis();
        Ok(state
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.expired(now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Write entries to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets 0600 permissions since entries carry API keys.
async fn write_atomic(path: &Path, data: &HashMap<String, Entry>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Corrupt(format!("serializing state: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("state path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".state.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp state file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting state file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp state file: {e}")))?;

    debug!(path = %path.display(), "persisted state");
    Ok(())
}
