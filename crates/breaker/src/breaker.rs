//! Breaker operations over the key-value store

use std::sync::Arc;

use kvstore::{KvStore, now_millis};
use tracing::{debug, warn};

use crate::error::Result;
use crate::state::ProviderState;

/// Key prefix for persisted provider state.
const STATE_PREFIX: &str = "provider-state:";

/// Circuit breaker over persisted per-provider state.
///
/// `force_available` (the debug flag) makes `is_available` always true so
/// operators can exercise a cooled-down provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn KvStore>,
    force_available: bool,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn KvStore>, force_available: bool) -> Self {
        Self {
            store,
            force_available,
        }
    }

    fn key(name: &str) -> String {
        format!("{STATE_PREFIX}{name}")
    }

    /// Read a provider's state, treating a missing or corrupt entry as fresh.
    ///
    /// A corrupt entry is logged and overwritten by the next update; refusing
    /// traffic over an unreadable counter would be worse than resetting it.
    pub async fn state(&self, name: &str) -> Result<ProviderState> {
        let raw = self.store.get(&Self::key(name)).await?;
        Ok(match raw {
            None => ProviderState::default(),
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(provider = name, error = %e, "corrupt provider state, resetting");
                ProviderState::default()
            }),
        })
    }

    /// Whether the provider may receive traffic now.
    pub async fn is_available(&self, name: &str) -> Result<bool> {
        if self.force_available {
            return Ok(true);
        }
        let state = self.state(name).await?;
        Ok(state.available_at(now_millis()))
    }

    /// Record a failed attempt and arm the cooldown per the tier table.
    pub async fn mark_failed(&self, name: &str, max_cooldown_secs: u64) -> Result<ProviderState> {
        let mut state = self.state(name).await?;
        state.record_failure(now_millis(), max_cooldown_secs);
        self.write(name, &state).await?;
        debug!(
            provider = name,
            consecutive_failures = state.consecutive_failures,
            cooldown_until = ?state.cooldown_until,
            "marked failed"
        );
        Ok(state)
    }

    /// Record a successful attempt, closing the breaker.
    pub async fn mark_success(&self, name: &str) -> Result<ProviderState> {
        let mut state = self.state(name).await?;
        state.record_success(now_millis());
        self.write(name, &state).await?;
        debug!(provider = name, "marked success");
        Ok(state)
    }

    /// Clear a provider's state entirely (admin reset).
    pub async fn reset(&self, name: &str) -> Result<()> {
        self.store.delete(&Self::key(name)).await?;
        Ok(())
    }

    /// Safety-valve picker: among `names`, the provider whose cooldown ends
    /// soonest (a missing cooldown sorts first). None when `names` is empty.
    pub async fn least_recently_failed(&self, names: &[String]) -> Result<Option<String>> {
        let mut best: Option<(u64, String)> = None;
        for name in names {
            let state = self.state(name).await?;
            let until = state.cooldown_until.unwrap_or(0);
            if best.as_ref().is_none_or(|(b, _)| until < *b) {
                best = Some((until, name.clone()));
            }
        }
        Ok(best.map(|(_, name)| name))
    }

    /// Snapshot all persisted provider states for the admin surface.
    pub async fn all_states(&self) -> Result<Vec<(String, ProviderState)>> {
        let keys = self.store.keys_with_prefix(STATE_PREFIX).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let name = key.trim_start_matches(STATE_PREFIX).to_string();
            let state = self.state(&name).await?;
            out.push((name, state));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn write(&self, name: &str, state: &ProviderState) -> Result<()> {
        let json =
            serde_json::to_string(state).map_err(|e| crate::error::Error::CorruptState {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        self.store.put(&Self::key(name), json, None).await?;
        Ok(())
    }
}
