//! Per-provider circuit breaker
//!
//! Tracks consecutive upstream failures per provider and opens a tiered
//! cooldown once a provider has failed three times in a row. State lives in
//! the key-value store under `provider-state:<name>` so it survives restarts
//! and is visible to the admin surface.
//!
//! Provider lifecycle:
//! 1. Failures 1–2: recorded, breaker stays closed
//! 2. Failure 3: breaker opens for 30s (capped by the configured maximum)
//! 3. Failures 5–9: 60s cooldown; 10 and beyond: 300s
//! 4. Any success fully resets the streak and closes the breaker
//!
//! Updates are read-modify-write without locking; a lost update at most
//! shortens or delays one cooldown, and the next failure re-arms it.

pub mod breaker;
pub mod error;
pub mod state;

pub use breaker::CircuitBreaker;
pub use error::{Error, Result};
pub use state::{ProviderState, cooldown_seconds};
