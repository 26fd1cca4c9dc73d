//! Evidence Orchestrator v0.5.0 - Staged Evidence Retrieval
//!
//! Fail-soft orchestration of heterogeneous evidence sources (web search,
//! vector index, knowledge graph, session memory, local lore) into one
//! ranked evidence set.
//!
//! # Architecture
//!
//! - **Routing**: orchestration gate, per-source cooldowns, source ordering
//! - **Budget**: adaptive per-source K allocation with an optional bandit tuner
//! - **Fusion**: weighted RRF, score calibration, recency/authority weighting
//! - **Pipeline**: fourteen sequential stages, each gated and fail-soft

// Core types
pub mod errors;
pub mod types;
pub mod cancel;
pub mod config;

// Routing
pub mod gate;
pub mod cooldown;
pub mod complexity;

// Budget and ranking
pub mod budget;
pub mod fusion;
pub mod signals;

// Collaborators and pipeline
pub mod sources;
pub mod orchestrator;
pub mod telemetry;

// Re-export commonly used types
pub use cancel::{Cancellable, CancellationToken};
pub use config::OrchestratorConfig;
pub use cooldown::{CooldownTracker, FailureCooldown};
pub use errors::{Result, RetrievalError};
pub use gate::{OrchestrationGate, Stage};
pub use orchestrator::{RetrievalOrchestrator, RetrievalReport, StageOutcome};
pub use sources::SourceAdapter;
pub use types::{EvidenceAccumulator, Query, QueryHints, ScoredDocument, SourceTag};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
