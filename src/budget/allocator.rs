//! Per-request K allocator
//!
//! Starts from a balanced baseline and shifts budget in `k_step` units:
//!
//! - recency need: web +step, kg -step/2
//! - official-only: web -step/2, kg -step/2 (vector untouched)
//! - vector intent: vector +step/2
//! - kg intent: kg +step/2
//!
//! Adjustments are additive; the result is then normalized so every
//! enabled source gets at least `min_per_source` and the sum never
//! exceeds `max_total_k`. Caller-pinned values win and are not clamped.

use crate::budget::tuner::{AllocationTuner, TunerTicket};
use crate::budget::types::{AllocationRequest, KAllocSettings, SourcePlan};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    Static,
    Heuristic,
    Tuned,
    Pinned,
    Fallback,
}

/// Allocation result plus the tuner ticket used for later feedback
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDecision {
    pub plan: SourcePlan,
    pub origin: PlanOrigin,
    pub recency: bool,
    pub ticket: Option<TunerTicket>,
}

/// K allocator with an optional learning tuner
#[derive(Clone)]
pub struct KAllocator {
    settings: KAllocSettings,
    tuner: Option<Arc<dyn AllocationTuner>>,
}

impl KAllocator {
    pub fn new(settings: KAllocSettings) -> Self {
        Self {
            settings,
            tuner: None,
        }
    }

    pub fn with_tuner(mut self, tuner: Arc<dyn AllocationTuner>) -> Self {
        self.tuner = Some(tuner);
        self
    }

    pub fn settings(&self) -> &KAllocSettings {
        &self.settings
    }

    pub fn tuner(&self) -> Option<&Arc<dyn AllocationTuner>> {
        self.tuner.as_ref()
    }

    /// Decide the plan for one request. Never fails: a panic anywhere in
    /// the heuristic or the tuner falls back to the static defaults.
    pub fn decide(&self, request: &AllocationRequest) -> AllocationDecision {
        match catch_unwind(AssertUnwindSafe(|| self.decide_inner(request))) {
            Ok(decision) => decision,
            Err(_) => {
                warn!("K allocation panicked, using static defaults");
                AllocationDecision {
                    plan: apply_pins(self.settings.static_plan(), request, &self.settings),
                    origin: PlanOrigin::Fallback,
                    recency: false,
                    ticket: None,
                }
            }
        }
    }

    fn decide_inner(&self, request: &AllocationRequest) -> AllocationDecision {
        let settings = &self.settings;
        let recency = needs_recency(&request.query_text, &settings.recency_keywords);

        let fully_pinned = request.pinned_web_k.is_some()
            && request.pinned_vector_k.is_some()
            && request.pinned_kg_k.is_some();

        if !settings.enabled || fully_pinned {
            let origin = if fully_pinned {
                PlanOrigin::Pinned
            } else {
                PlanOrigin::Static
            };
            return AllocationDecision {
                plan: apply_pins(settings.static_plan(), request, settings),
                origin,
                recency,
                ticket: None,
            };
        }

        let baseline = self.heuristic(request, recency);

        if settings.tuner_enabled {
            if let Some(tuner) = &self.tuner {
                if let Some(tuned) = tuner.tune(request, &baseline, settings) {
                    let (w, v, k) = normalize(
                        tuned.plan.web_k as i64,
                        tuned.plan.vector_k as i64,
                        tuned.plan.kg_k as i64,
                        request,
                        settings,
                    );
                    let plan = finish(w, v, k, request, settings);
                    debug!(
                        arm = ?tuned.ticket.arm,
                        web_k = plan.web_k,
                        vector_k = plan.vector_k,
                        kg_k = plan.kg_k,
                        "Tuner adjusted K allocation"
                    );
                    return AllocationDecision {
                        plan,
                        origin: PlanOrigin::Tuned,
                        recency,
                        ticket: Some(tuned.ticket),
                    };
                }
            }
        }

        let plan = finish(
            baseline.web_k,
            baseline.vector_k,
            baseline.kg_k,
            request,
            settings,
        );
        AllocationDecision {
            plan,
            origin: PlanOrigin::Heuristic,
            recency,
            ticket: None,
        }
    }

    /// Heuristic plan before pins, already normalized
    pub fn heuristic(&self, request: &AllocationRequest, recency: bool) -> SourcePlan {
        let settings = &self.settings;
        let step = settings.k_step as i64;
        let half = (settings.k_step / 2) as i64;

        let eff_max = settings.effective_max_total();
        let base = settings
            .base_per_source
            .clamp(settings.min_per_source, (eff_max / 3).max(settings.min_per_source))
            as i64;

        let (mut w, mut v, mut k) = (base, base, base);

        if recency {
            w += step;
            k -= half;
        }
        if request.official_only {
            w -= half;
            k -= half;
        }
        if let Some(intent) = request.intent.as_deref() {
            let intent = intent.to_lowercase();
            if settings.vector_intents.iter().any(|i| i.eq_ignore_ascii_case(&intent)) {
                v += half;
            }
            if settings.kg_intents.iter().any(|i| i.eq_ignore_ascii_case(&intent)) {
                k += half;
            }
        }

        let (w, v, k) = normalize(w, v, k, request, settings);
        SourcePlan {
            web_k: w,
            vector_k: v,
            kg_k: k,
            pool_limit: pool_limit_for(w, v, k, settings),
        }
    }
}

/// Recency need: a configured keyword or a version token such as `5.8`
pub fn needs_recency(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    if keywords
        .iter()
        .any(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
    {
        return true;
    }
    lower.split_whitespace().any(is_version_token)
}

fn is_version_token(token: &str) -> bool {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.');
    let token = token.trim_start_matches(['v', 'V']);
    let mut parts = token.split('.');
    let major = parts.next().unwrap_or("");
    let minor = match parts.next() {
        Some(m) => m,
        None => return false,
    };
    !major.is_empty()
        && !minor.is_empty()
        && major.chars().all(|c| c.is_ascii_digit())
        && minor.chars().all(|c| c.is_ascii_digit())
}

/// Clamp to bounds and zero out disabled sources.
///
/// Overflow is taken off the largest source first (ties: kg, then
/// vector, then web) one unit at a time, never below `min_per_source`.
pub(crate) fn normalize(
    web: i64,
    vector: i64,
    kg: i64,
    request: &AllocationRequest,
    settings: &KAllocSettings,
) -> (usize, usize, usize) {
    let min = settings.min_per_source as i64;
    let eff_max = settings.effective_max_total() as i64;

    // index 0 = kg, 1 = vector, 2 = web so ties favour reducing kg first
    let enabled = [!request.rag_disabled, !request.rag_disabled, !request.web_disabled];
    let mut ks = [kg, vector, web];
    for (slot, on) in ks.iter_mut().zip(enabled) {
        *slot = if on { (*slot).max(min) } else { 0 };
    }

    while ks.iter().sum::<i64>() > eff_max {
        let mut target: Option<usize> = None;
        for i in 0..3 {
            if !enabled[i] || ks[i] <= min {
                continue;
            }
            match target {
                Some(t) if ks[t] >= ks[i] => {}
                _ => target = Some(i),
            }
        }
        match target {
            Some(t) => ks[t] -= 1,
            None => break,
        }
    }

    (ks[2] as usize, ks[1] as usize, ks[0] as usize)
}

fn pool_limit_for(w: usize, v: usize, k: usize, settings: &KAllocSettings) -> usize {
    let max_k = w.max(v).max(k);
    (max_k * settings.pool_multiplier.max(1)).max(w + v + k)
}

fn finish(
    w: usize,
    v: usize,
    k: usize,
    request: &AllocationRequest,
    settings: &KAllocSettings,
) -> SourcePlan {
    let plan = SourcePlan {
        web_k: w,
        vector_k: v,
        kg_k: k,
        pool_limit: pool_limit_for(w, v, k, settings),
    };
    apply_pins(plan, request, settings)
}

/// Caller-pinned values win; pool_limit is recomputed around them
fn apply_pins(mut plan: SourcePlan, request: &AllocationRequest, settings: &KAllocSettings) -> SourcePlan {
    if let Some(w) = request.pinned_web_k {
        plan.web_k = w;
    }
    if let Some(v) = request.pinned_vector_k {
        plan.vector_k = v;
    }
    if let Some(k) = request.pinned_kg_k {
        plan.kg_k = k;
    }
    plan.pool_limit = match request.pinned_pool_limit {
        Some(limit) => limit,
        None => pool_limit_for(plan.web_k, plan.vector_k, plan.kg_k, settings),
    };
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> KAllocator {
        KAllocator::new(KAllocSettings::default())
    }

    #[test]
    fn test_balanced_baseline() {
        let decision = allocator().decide(&AllocationRequest::new("how does photosynthesis work"));
        assert_eq!(decision.origin, PlanOrigin::Heuristic);
        assert_eq!(decision.plan.web_k, 6);
        assert_eq!(decision.plan.vector_k, 6);
        assert_eq!(decision.plan.kg_k, 6);
        assert_eq!(decision.plan.pool_limit, 18);
    }

    #[test]
    fn test_recency_biases_web() {
        let decision = allocator().decide(&AllocationRequest::new("원신 5.8 패치 최신 공지"));
        assert!(decision.recency);
        assert!(decision.plan.web_k > 6);
        assert!(decision.plan.kg_k < 6);
        assert!(decision.plan.total() <= 24);
    }

    #[test]
    fn test_version_token_alone_triggers_recency() {
        assert!(needs_recency("what changed in v2.14", &[]));
        assert!(needs_recency("genshin 5.8?", &[]));
        assert!(!needs_recency("pi is 3.x roughly", &[]));
        assert!(!needs_recency("no numbers here", &[]));
    }

    #[test]
    fn test_official_only_shrinks_web_and_kg() {
        let mut request = AllocationRequest::new("policy document");
        request.official_only = true;
        let plan = allocator().decide(&request).plan;
        assert_eq!(plan.vector_k, 6);
        assert_eq!(plan.web_k, 4);
        assert_eq!(plan.kg_k, 4);
    }

    #[test]
    fn test_recency_and_official_are_additive() {
        let mut request = AllocationRequest::new("latest release notes");
        request.official_only = true;
        let plan = allocator().decide(&request).plan;
        assert_eq!(plan.web_k, 8);
        assert_eq!(plan.vector_k, 6);
        assert_eq!(plan.kg_k, 2);
    }

    #[test]
    fn test_disabled_uses_static_defaults() {
        let settings = KAllocSettings {
            enabled: false,
            ..Default::default()
        };
        let decision = KAllocator::new(settings.clone()).decide(&AllocationRequest::new("latest news"));
        assert_eq!(decision.origin, PlanOrigin::Static);
        assert_eq!(decision.plan, settings.static_plan());
    }

    #[test]
    fn test_pins_win_unclamped() {
        let mut request = AllocationRequest::new("anything");
        request.pinned_web_k = Some(1);
        request.pinned_kg_k = Some(30);
        let plan = allocator().decide(&request).plan;
        assert_eq!(plan.web_k, 1);
        assert_eq!(plan.kg_k, 30);
        assert_eq!(plan.vector_k, 6);
        assert!(plan.pool_limit >= 60);
    }

    #[test]
    fn test_fully_pinned_skips_heuristic() {
        let mut request = AllocationRequest::new("latest");
        request.pinned_web_k = Some(3);
        request.pinned_vector_k = Some(3);
        request.pinned_kg_k = Some(3);
        request.pinned_pool_limit = Some(5);
        let decision = allocator().decide(&request);
        assert_eq!(decision.origin, PlanOrigin::Pinned);
        assert_eq!(decision.plan.pool_limit, 5);
    }

    #[test]
    fn test_disabled_sources_get_zero() {
        let mut request = AllocationRequest::new("anything");
        request.web_disabled = true;
        let plan = allocator().decide(&request).plan;
        assert_eq!(plan.web_k, 0);
        assert!(plan.vector_k >= 2);
        assert!(plan.kg_k >= 2);
    }

    #[test]
    fn test_normalize_reduces_largest_first() {
        let settings = KAllocSettings::default();
        let request = AllocationRequest::new("x");
        let (w, v, k) = normalize(20, 10, 10, &request, &settings);
        assert_eq!(w + v + k, 24);
        assert_eq!((w, v, k), (8, 8, 8));

        let (w, v, k) = normalize(9, 9, 9, &request, &settings);
        assert_eq!((w, v, k), (8, 8, 8));

        let (w, v, k) = normalize(9, 9, 8, &request, &settings);
        assert_eq!(w + v + k, 24);
        assert_eq!(k, 8);
    }

    #[test]
    fn test_normalize_respects_min() {
        let settings = KAllocSettings::default();
        let request = AllocationRequest::new("x");
        let (w, v, k) = normalize(-5, 0, 1, &request, &settings);
        assert_eq!((w, v, k), (2, 2, 2));
    }
}
