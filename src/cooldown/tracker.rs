//! Per-source failure cooldown tracker
//!
//! Counts consecutive failures inside a sliding window and opens a
//! cooldown once the threshold is reached. Every further trip doubles
//! the cooldown up to a cap; a success forgets the source entirely.

use super::types::{BreakerState, CooldownConfig, CooldownState};
use dashmap::DashMap;
use tracing::{debug, info};

/// Failure/success recorder consulted by the gate
pub trait FailureCooldown: Send + Sync {
    /// Whether the source is currently cooling down
    fn is_cooling_down(&self, source: &str) -> bool;

    /// Record one failed call
    fn record_failure(&self, source: &str);

    /// Record one successful call
    fn record_success(&self, source: &str);
}

/// Concrete tracker backed by a sharded map, so writes for one source
/// never block reads of another
#[derive(Debug, Default)]
pub struct CooldownTracker {
    config: CooldownConfig,
    states: DashMap<String, BreakerState>,
}

impl CooldownTracker {
    /// Create tracker with default settings
    pub fn new() -> Self {
        Self::with_config(CooldownConfig::default())
    }

    /// Create tracker with custom settings
    pub fn with_config(config: CooldownConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Record a failure at an explicit wall-clock time (ms since epoch)
    pub fn record_failure_at(&self, source: &str, now_ms: i64) {
        let key = canonical_source(source);
        let mut entry = self.states.entry(key.clone()).or_default();
        let state = entry.value_mut();

        let window = self.config.window_ms as i64;
        if state.last_failure_ms > 0 && now_ms - state.last_failure_ms > window {
            state.consecutive_failures = 0;
        }

        state.consecutive_failures += 1;
        state.last_failure_ms = now_ms;

        if state.consecutive_failures >= self.config.failure_threshold.max(1) {
            state.trips += 1;
            let duration = self.config.cooldown_for_trip(state.trips);
            state.cooldown_until_ms = now_ms + duration as i64;
            state.consecutive_failures = 0;

            info!(
                source = %key,
                trips = state.trips,
                cooldown_ms = duration,
                "Source entered cooldown"
            );
        } else {
            debug!(
                source = %key,
                consecutive = state.consecutive_failures,
                "Source failure recorded"
            );
        }
    }

    /// Cooldown check at an explicit wall-clock time (ms since epoch).
    ///
    /// Also evicts state that has been idle for longer than the TTL.
    pub fn is_cooling_down_at(&self, source: &str, now_ms: i64) -> bool {
        let key = canonical_source(source);

        let ttl = self.config.state_ttl_ms as i64;
        let expired = |state: &BreakerState| {
            let last_activity = state.last_failure_ms.max(state.cooldown_until_ms);
            state.cooldown_until_ms <= now_ms && now_ms - last_activity > ttl
        };

        let cooling = match self.states.get(&key) {
            Some(state) => state.cooldown_until_ms > now_ms,
            None => return false,
        };

        if !cooling {
            // Re-checked under the shard lock so a failure recorded in between survives
            self.states.remove_if(&key, |_, state| expired(state));
        }
        cooling
    }

    /// Current state for a source, if any failure is on record
    pub fn snapshot(&self, source: &str) -> Option<CooldownState> {
        let key = canonical_source(source);
        self.states
            .get(&key)
            .map(|state| CooldownState::from_breaker(&key, state.value()))
    }

    /// Sources with state on record
    pub fn tracked_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        sources.sort();
        sources
    }

    /// Forget everything
    pub fn clear(&self) {
        self.states.clear();
    }
}

impl FailureCooldown for CooldownTracker {
    fn is_cooling_down(&self, source: &str) -> bool {
        self.is_cooling_down_at(source, now_ms())
    }

    fn record_failure(&self, source: &str) {
        self.record_failure_at(source, now_ms());
    }

    fn record_success(&self, source: &str) {
        let key = canonical_source(source);
        if self.states.remove(&key).is_some() {
            debug!(source = %key, "Source recovered, cooldown cleared");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Canonical cooldown key for a source or collaborator name
pub fn canonical_source(name: &str) -> String {
    let s = name.trim().to_lowercase();

    if s.starts_with("disambig") {
        return "disambig".to_string();
    }
    if s.contains("transformer") {
        return "qtx".to_string();
    }
    if s == "llm" || s.starts_with("chat") || s.contains("model") || s.contains("completion") {
        return "llm".to_string();
    }
    if s.starts_with("naver") || s.starts_with("brave") || s == "web" || s.starts_with("web.search") {
        return "web".to_string();
    }
    s
}
