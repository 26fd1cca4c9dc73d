//! Telemetry for the retrieval pipeline
//!
//! Fire-and-forget event recording. `record` never blocks: when the
//! collector's lock is contended or poisoned the event is dropped.

use crate::budget::SourcePlan;
use crate::signals::EvidenceSignals;
use crate::types::SourceTag;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default number of events kept in the log
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Telemetry event types
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    // Planning events
    OrderDecision {
        order: Vec<SourceTag>,
        reason: String,
    },
    KAllocation {
        plan: SourcePlan,
        origin: String,
    },

    // Fusion events
    FusionApplied {
        lists: usize,
        top_k: usize,
        fused: usize,
    },
    RiskDeceleration {
        risk: u8,
        base_top_k: usize,
        top_k: usize,
    },
    RepairApplied {
        before: usize,
        after: usize,
    },

    // Stage events
    StageFailed {
        stage: String,
        reason: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    LoreInjected {
        count: usize,
        via_entities: bool,
    },

    // Evidence summary
    EvidenceSignalsSample {
        signals: EvidenceSignals,
    },
}

/// Sink the orchestrator reports to
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Telemetry statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryStats {
    pub order_decisions: usize,
    pub allocations: usize,
    pub fusions: usize,
    pub decelerations: usize,
    pub repairs: usize,
    pub stages_failed: usize,
    pub stages_skipped: usize,
    pub lore_injections: usize,
    pub signal_samples: usize,
    pub dropped_events: usize,
}

/// Bounded in-memory collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    stats: Arc<Mutex<TelemetryStats>>,
    capacity: usize,
    start_time: Instant,
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            stats: Arc::new(Mutex::new(TelemetryStats::default())),
            capacity: capacity.max(1),
            start_time: Instant::now(),
        }
    }

    /// Get current statistics
    pub fn get_stats(&self) -> TelemetryStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => TelemetryStats::default(),
        }
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Get recent events (last n)
    pub fn recent_events(&self, n: usize) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => {
                let start = events.len().saturating_sub(n);
                events.iter().skip(start).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// All stored events
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.recent_events(usize::MAX)
    }

    /// Names of failed stages, in order
    pub fn failed_stages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::StageFailed { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }
}

impl TelemetrySink for TelemetryCollector {
    fn record(&self, event: TelemetryEvent) {
        // Update stats
        match self.stats.try_lock() {
            Ok(mut stats) => match &event {
                TelemetryEvent::OrderDecision { .. } => stats.order_decisions += 1,
                TelemetryEvent::KAllocation { .. } => stats.allocations += 1,
                TelemetryEvent::FusionApplied { .. } => stats.fusions += 1,
                TelemetryEvent::RiskDeceleration { .. } => stats.decelerations += 1,
                TelemetryEvent::RepairApplied { .. } => stats.repairs += 1,
                TelemetryEvent::StageFailed { .. } => stats.stages_failed += 1,
                TelemetryEvent::StageSkipped { .. } => stats.stages_skipped += 1,
                TelemetryEvent::LoreInjected { .. } => stats.lore_injections += 1,
                TelemetryEvent::EvidenceSignalsSample { .. } => stats.signal_samples += 1,
            },
            Err(_) => return,
        }

        // Store event
        match self.events.try_lock() {
            Ok(mut events) => {
                if events.len() >= self.capacity {
                    events.pop_front();
                }
                events.push_back(event);
            }
            Err(_) => {
                if let Ok(mut stats) = self.stats.try_lock() {
                    stats.dropped_events += 1;
                }
            }
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}
