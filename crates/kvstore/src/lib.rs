//! Opaque key-value persistence for gateway state
//!
//! Everything the gateway persists (provider configuration, allowed tokens,
//! settings, breaker state) goes through the `KvStore` trait as string
//! key/value pairs with an optional TTL. Handlers never see the backend.
//!
//! Two implementations:
//! - `MemoryStore`: process-local, used in tests and ephemeral runs
//! - `FileStore`: single JSON file with atomic temp-file + rename writes

pub mod error;
pub mod file;
pub mod memory;

pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;

use std::time::Duration;

/// Opaque string→string store with per-entry TTL.
///
/// Writes are last-write-wins; the gateway tolerates lost updates on breaker
/// state, so no compare-and-swap surface is needed.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any existing entry. A `ttl` of `None` means
    /// the entry never expires.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys beginning with `prefix` (expired entries excluded).
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Current wall clock as unix milliseconds.
///
/// Persisted expirations are absolute so they survive restarts.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
