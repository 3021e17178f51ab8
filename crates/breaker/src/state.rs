//! Persisted breaker state and the cooldown schedule

use serde::{Deserialize, Serialize};

/// Failure-tracking state for one provider, persisted as JSON.
///
/// Field names match the persisted camelCase schema. All timestamps are
/// unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderState {
    pub consecutive_failures: u32,
    pub last_failure: Option<u64>,
    pub last_success: Option<u64>,
    /// Breaker open until this instant; None = closed
    pub cooldown_until: Option<u64>,
}

impl ProviderState {
    /// Whether traffic may be sent at instant `now`.
    pub fn available_at(&self, now: u64) -> bool {
        match self.cooldown_until {
            None => true,
            Some(until) => now >= until,
        }
    }

    /// Record a failure at `now`, opening or extending the cooldown per the
    /// tier table.
    pub fn record_failure(&mut self, now: u64, max_cooldown_secs: u64) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        let cooldown = cooldown_seconds(self.consecutive_failures, max_cooldown_secs);
        self.cooldown_until = if cooldown > 0 {
            Some(now + cooldown * 1000)
        } else {
            None
        };
    }

    /// Record a success at `now`, fully resetting the failure streak.
    pub fn record_success(&mut self, now: u64) {
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.cooldown_until = None;
        self.last_success = Some(now);
    }
}

/// Tiered cooldown schedule in seconds, capped at `max`.
///
/// | consecutive failures | cooldown |
/// |---|---|
/// | 0–2  | 0 |
/// | 3–4  | 30 |
/// | 5–9  | 60 |
/// | ≥10  | 300 |
pub fn cooldown_seconds(consecutive_failures: u32, max: u64) -> u64 {
    let base = match consecutive_failures {
        0..=2 => 0,
        3..=4 => 30,
        5..=9 => 60,
        _ => 300,
    };
    base.min(max)
}
