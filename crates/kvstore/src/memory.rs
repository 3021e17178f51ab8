//! In-memory store for tests and ephemeral runs

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::{KvStore, now_millis};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Absolute expiration in unix millis; None = never
    expires_at: Option<u64>,
}

impl Entry {
    fn expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
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
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.remove(key);
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
