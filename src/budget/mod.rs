//! Per-request retrieval budget (K allocation)
//! Decides how many results each source is asked for and the candidate pool ceiling

pub mod allocator;
pub mod tuner;
pub mod types;

pub use allocator::{needs_recency, AllocationDecision, KAllocator, PlanOrigin};
pub use tuner::{AllocationTuner, Arm, BanditTuner, TunedPlan, TunerTicket};
pub use types::{AllocationRequest, KAllocSettings, SourcePlan};
