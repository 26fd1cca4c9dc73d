//! Cooldown tracker type definitions

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Default consecutive failures that open a cooldown
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default sliding window for counting failures (60 seconds)
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default first cooldown duration (30 seconds)
pub const DEFAULT_BASE_COOLDOWN_MS: u64 = 30_000;

/// Default cooldown cap (10 minutes)
pub const DEFAULT_MAX_COOLDOWN_MS: u64 = 600_000;

/// Idle state older than this is evicted (15 minutes)
pub const DEFAULT_STATE_TTL_MS: u64 = 900_000;

/// Cooldown tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Consecutive failures inside the window that open a cooldown
    pub failure_threshold: u32,

    /// Failures further apart than this restart the count
    pub window_ms: u64,

    /// Duration of the first cooldown
    pub base_cooldown_ms: u64,

    /// Upper bound for the doubled cooldown
    pub max_cooldown_ms: u64,

    /// Idle state is forgotten after this long
    pub state_ttl_ms: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            window_ms: DEFAULT_WINDOW_MS,
            base_cooldown_ms: DEFAULT_BASE_COOLDOWN_MS,
            max_cooldown_ms: DEFAULT_MAX_COOLDOWN_MS,
            state_ttl_ms: DEFAULT_STATE_TTL_MS,
        }
    }
}

impl CooldownConfig {
    /// Cooldown length for the n-th trip (1-based), binary exponential
    /// and capped at `max_cooldown_ms`
    pub fn cooldown_for_trip(&self, trip: u32) -> u64 {
        let exp = trip.saturating_sub(1).min(20);
        self.base_cooldown_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_cooldown_ms)
    }
}

/// Per-source failure bookkeeping (milliseconds since the Unix epoch)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BreakerState {
    pub consecutive_failures: u32,
    pub trips: u32,
    pub last_failure_ms: i64,
    pub cooldown_until_ms: i64,
}

/// Read-only view of a source's cooldown state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    pub source: String,
    pub consecutive_failures: u32,
    pub trips: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl CooldownState {
    pub(crate) fn from_breaker(source: &str, state: &BreakerState) -> Self {
        Self {
            source: source.to_string(),
            consecutive_failures: state.consecutive_failures,
            trips: state.trips,
            cooldown_until: millis_to_datetime(state.cooldown_until_ms),
            last_failure: millis_to_datetime(state.last_failure_ms),
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_doubles_and_caps() {
        let config = CooldownConfig::default();
        assert_eq!(config.cooldown_for_trip(1), 30_000);
        assert_eq!(config.cooldown_for_trip(2), 60_000);
        assert_eq!(config.cooldown_for_trip(3), 120_000);
        assert_eq!(config.cooldown_for_trip(10), 600_000);
        assert_eq!(config.cooldown_for_trip(u32::MAX), 600_000);
    }

    #[test]
    fn test_state_view_without_failures() {
        let view = CooldownState::from_breaker("web", &BreakerState::default());
        assert!(view.cooldown_until.is_none());
        assert!(view.last_failure.is_none());
    }
}
