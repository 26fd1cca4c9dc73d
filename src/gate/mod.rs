//! Orchestration gate
//!
//! Stateless per-request decision on whether a stage may run. Rules are
//! checked in order and the first match wins:
//!
//! 1. an enabling hint explicitly set to `false` denies
//! 2. an LLM-dependent stage is denied while the auxiliary LLM is blocked
//! 3. a stage depending on a source that is cooling down is denied
//! 4. everything else is allowed

use crate::cooldown::FailureCooldown;
use crate::types::{Query, QueryHints};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Gated pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SelfAsk,
    Analyze,
    Web,
    Vector,
    Kg,
    EntityLore,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SelfAsk => "self_ask",
            Stage::Analyze => "analyze",
            Stage::Web => "web",
            Stage::Vector => "vector",
            Stage::Kg => "kg",
            Stage::EntityLore => "entity_lore",
        }
    }

    /// Stages that call the auxiliary LLM
    pub fn is_llm_dependent(&self) -> bool {
        matches!(self, Stage::SelfAsk | Stage::Analyze | Stage::EntityLore)
    }

    /// Canonical source names this stage needs to be healthy
    pub fn dependencies(&self) -> &'static [&'static str] {
        match self {
            Stage::SelfAsk | Stage::Analyze => &["llm", "web"],
            Stage::Web => &["web"],
            Stage::Vector => &["vector"],
            Stage::Kg => &["kg"],
            Stage::EntityLore => &["llm"],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    DisabledByHint(&'static str),
    AuxBlocked,
    CoolingDown(&'static str),
}

impl GateDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    pub fn reason(&self) -> String {
        match self {
            GateDecision::Allow => "allow".to_string(),
            GateDecision::DisabledByHint(hint) => format!("disabled by {}", hint),
            GateDecision::AuxBlocked => "auxiliary llm blocked".to_string(),
            GateDecision::CoolingDown(source) => format!("{} cooling down", source),
        }
    }
}

/// Gate bound to the shared cooldown tracker
#[derive(Clone)]
pub struct OrchestrationGate {
    cooldown: Arc<dyn FailureCooldown>,
}

impl OrchestrationGate {
    pub fn new(cooldown: Arc<dyn FailureCooldown>) -> Self {
        Self { cooldown }
    }

    /// Whether `stage` may run for `query`
    pub fn allow(&self, stage: Stage, query: &Query) -> bool {
        let decision = self.decide(stage, &query.hints);
        if !decision.allowed() {
            debug!(stage = %stage, reason = %decision.reason(), "Gate denied stage");
        }
        decision.allowed()
    }

    /// Full decision with the rule that matched
    pub fn decide(&self, stage: Stage, hints: &QueryHints) -> GateDecision {
        if let Some(hint) = disabled_by_hint(stage, hints) {
            return GateDecision::DisabledByHint(hint);
        }

        if stage.is_llm_dependent() && hints.aux_blocked() {
            return GateDecision::AuxBlocked;
        }
        if stage == Stage::EntityLore && hints.compression_mode {
            return GateDecision::AuxBlocked;
        }

        for dep in stage.dependencies() {
            if self.cooling(dep) {
                return GateDecision::CoolingDown(dep);
            }
        }

        GateDecision::Allow
    }

    /// A panicking tracker counts as "not cooling"
    fn cooling(&self, source: &str) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.cooldown.is_cooling_down(source))) {
            Ok(cooling) => cooling,
            Err(_) => {
                warn!(source = source, "Cooldown check panicked, treating as healthy");
                false
            }
        }
    }
}

fn disabled_by_hint(stage: Stage, hints: &QueryHints) -> Option<&'static str> {
    let web_off = hints.allow_web == Some(false);

    match stage {
        Stage::SelfAsk => {
            if hints.enable_self_ask == Some(false) {
                Some("enableSelfAsk")
            } else if web_off {
                Some("allowWeb")
            } else if hints.web_rate_limited {
                Some("webRateLimited")
            } else {
                None
            }
        }
        Stage::Analyze => {
            if hints.enable_analyze == Some(false) {
                Some("enableAnalyze")
            } else if web_off {
                Some("allowWeb")
            } else if hints.web_rate_limited {
                Some("webRateLimited")
            } else {
                None
            }
        }
        Stage::Web => {
            if web_off {
                Some("allowWeb")
            } else if hints.web_rate_limited {
                Some("webRateLimited")
            } else {
                None
            }
        }
        Stage::Vector | Stage::Kg => {
            if hints.allow_rag == Some(false) {
                Some("allowRag")
            } else {
                None
            }
        }
        Stage::EntityLore => None,
    }
}
