//! Retrieval orchestration: stage runner, ordering, risk deceleration,
//! repair and the staged pipeline tying them together.

pub mod order;
pub mod pipeline;
pub mod repair;
pub mod risk;
pub mod stage;

pub use order::{looks_like_factoid, OrderDecision, OrderMode, RetrievalOrderService};
pub use pipeline::{RetrievalOrchestrator, RetrievalReport};
pub use repair::{EvidenceRepairer, RepairConfig, RepairOutcome};
pub use risk::{decelerate_top_k, RiskConfig};
pub use stage::{run_stage, run_sync, StageFailure, StageOutcome};
