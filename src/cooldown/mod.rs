//! Failure cooldown module
//!
//! Process-lifetime, per-source failure tracking shared by every request.

pub mod tracker;
pub mod types;

pub use tracker::{canonical_source, CooldownTracker, FailureCooldown};
pub use types::{CooldownConfig, CooldownState};
