//! Learning K tuner
//!
//! A contextual bandit over a handful of allocation shapes. Context is
//! bucketed into tiles (intent, complexity level, recency, official-only);
//! each tile keeps its own UCB1 statistics. With probability `epsilon` an
//! arm is picked at random instead.

use crate::budget::allocator::needs_recency;
use crate::budget::types::{AllocationRequest, KAllocSettings, SourcePlan};
use crate::types::SourceTag;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tracing::debug;

/// Allocation shapes the bandit chooses between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arm {
    Base,
    WebHeavy,
    VectorHeavy,
    KgHeavy,
    CostSaver,
}

impl Arm {
    pub const ALL: [Arm; 5] = [
        Arm::Base,
        Arm::WebHeavy,
        Arm::VectorHeavy,
        Arm::KgHeavy,
        Arm::CostSaver,
    ];

    fn index(&self) -> usize {
        match self {
            Arm::Base => 0,
            Arm::WebHeavy => 1,
            Arm::VectorHeavy => 2,
            Arm::KgHeavy => 3,
            Arm::CostSaver => 4,
        }
    }
}

/// Handle returned with a tuned plan, used to report the reward later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerTicket {
    pub tile: u64,
    pub arm: Arm,
}

/// Raw (not yet normalized) plan from a tuner
#[derive(Debug, Clone, PartialEq)]
pub struct TunedPlan {
    pub plan: SourcePlan,
    pub ticket: TunerTicket,
}

/// Pluggable learning policy. The allocator always re-normalizes the
/// returned plan, so a tuner cannot break the K bounds.
pub trait AllocationTuner: Send + Sync {
    /// Propose a plan, or `None` to keep the heuristic one
    fn tune(
        &self,
        request: &AllocationRequest,
        baseline: &SourcePlan,
        settings: &KAllocSettings,
    ) -> Option<TunedPlan>;

    /// Report the observed reward in [0, 1] for an earlier decision
    fn feedback(&self, ticket: &TunerTicket, reward: f64);
}

#[derive(Debug, Clone, Default)]
struct TileStats {
    pulls: [u64; 5],
    reward_sum: [f64; 5],
    total: u64,
}

impl TileStats {
    fn mean(&self, i: usize) -> f64 {
        if self.pulls[i] == 0 {
            0.0
        } else {
            self.reward_sum[i] / self.pulls[i] as f64
        }
    }

    fn ucb_pick(&self) -> Arm {
        if let Some(arm) = Arm::ALL.iter().find(|a| self.pulls[a.index()] == 0) {
            return *arm;
        }

        let ln_total = (self.total.max(1) as f64).ln();
        let mut best = Arm::Base;
        let mut best_score = f64::NEG_INFINITY;
        for arm in Arm::ALL {
            let i = arm.index();
            let bonus = (2.0 * ln_total / self.pulls[i] as f64).sqrt();
            let score = self.mean(i) + bonus;
            if score > best_score {
                best_score = score;
                best = arm;
            }
        }
        best
    }
}

/// UCB1 + epsilon-greedy tuner with per-tile statistics
pub struct BanditTuner {
    epsilon: f64,
    tiles: Mutex<HashMap<u64, TileStats>>,
    rng: Mutex<StdRng>,
}

impl BanditTuner {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: sanitize_epsilon(epsilon),
            tiles: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic exploration for reproducible runs
    pub fn with_seed(epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon: sanitize_epsilon(epsilon),
            tiles: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Context tile for a request
    pub fn tile_for(request: &AllocationRequest, settings: &KAllocSettings) -> u64 {
        let mut hasher = DefaultHasher::new();
        request
            .intent
            .as_deref()
            .unwrap_or("general")
            .to_lowercase()
            .hash(&mut hasher);
        complexity_level(request.complexity).hash(&mut hasher);
        needs_recency(&request.query_text, &settings.recency_keywords).hash(&mut hasher);
        request.official_only.hash(&mut hasher);
        hasher.finish()
    }

    /// Number of times `arm` was rewarded in `tile`
    pub fn pulls(&self, tile: u64, arm: Arm) -> u64 {
        match self.tiles.lock() {
            Ok(tiles) => tiles.get(&tile).map(|s| s.pulls[arm.index()]).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Mean reward of `arm` in `tile`
    pub fn mean_reward(&self, tile: u64, arm: Arm) -> f64 {
        match self.tiles.lock() {
            Ok(tiles) => tiles.get(&tile).map(|s| s.mean(arm.index())).unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    fn pick(&self, tile: u64) -> Option<Arm> {
        let explore = match self.rng.lock() {
            Ok(mut rng) => {
                if self.epsilon > 0.0 && rng.gen::<f64>() < self.epsilon {
                    Some(Arm::ALL[rng.gen_range(0..Arm::ALL.len())])
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if explore.is_some() {
            return explore;
        }

        let tiles = self.tiles.lock().ok()?;
        Some(tiles.get(&tile).map(TileStats::ucb_pick).unwrap_or(Arm::Base))
    }
}

impl Default for BanditTuner {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl AllocationTuner for BanditTuner {
    fn tune(
        &self,
        request: &AllocationRequest,
        baseline: &SourcePlan,
        settings: &KAllocSettings,
    ) -> Option<TunedPlan> {
        let tile = Self::tile_for(request, settings);
        let arm = self.pick(tile)?;

        let step = settings.k_step as i64;
        let half = (settings.k_step / 2) as i64;
        let (mut w, mut v, mut k) = (
            baseline.web_k as i64,
            baseline.vector_k as i64,
            baseline.kg_k as i64,
        );

        match arm {
            Arm::Base => {}
            Arm::WebHeavy => {
                w += step;
                v -= half;
                k -= half;
            }
            Arm::VectorHeavy => {
                v += step;
                w -= half;
                k -= half;
            }
            Arm::KgHeavy => {
                k += step;
                w -= half;
                v -= half;
            }
            Arm::CostSaver => {
                w -= half;
                v -= half;
                k -= half;
            }
        }

        if settings.complexity_scaling {
            let factor = 0.75 + 0.5 * request.complexity.clamp(0.0, 1.0);
            w = (w as f64 * factor).round() as i64;
            v = (v as f64 * factor).round() as i64;
            k = (k as f64 * factor).round() as i64;
        }

        let (w, v, k) = shift_from_cooling(w, v, k, &request.cooling, settings);

        debug!(tile = tile, arm = ?arm, "Bandit selected allocation arm");

        Some(TunedPlan {
            plan: SourcePlan {
                web_k: w.max(0) as usize,
                vector_k: v.max(0) as usize,
                kg_k: k.max(0) as usize,
                pool_limit: 0,
            },
            ticket: TunerTicket { tile, arm },
        })
    }

    fn feedback(&self, ticket: &TunerTicket, reward: f64) {
        let reward = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Ok(mut tiles) = self.tiles.lock() {
            let stats = tiles.entry(ticket.tile).or_default();
            let i = ticket.arm.index();
            stats.pulls[i] += 1;
            stats.reward_sum[i] += reward;
            stats.total += 1;
        }
    }
}

/// Cooling sources drop to the floor; what they free goes to the others
fn shift_from_cooling(
    w: i64,
    v: i64,
    k: i64,
    cooling: &[SourceTag],
    settings: &KAllocSettings,
) -> (i64, i64, i64) {
    let min = settings.min_per_source as i64;
    let mut ks = [w, v, k];
    let tags = [SourceTag::Web, SourceTag::Vector, SourceTag::Kg];

    let mut freed = 0;
    for (slot, tag) in ks.iter_mut().zip(tags) {
        if cooling.contains(&tag) && *slot > min {
            freed += *slot - min;
            *slot = min;
        }
    }

    let healthy: Vec<usize> = (0..3).filter(|i| !cooling.contains(&tags[*i])).collect();
    if freed > 0 && !healthy.is_empty() {
        let share = freed / healthy.len() as i64;
        let mut rest = freed % healthy.len() as i64;
        for i in healthy {
            ks[i] += share;
            if rest > 0 {
                ks[i] += 1;
                rest -= 1;
            }
        }
    }

    (ks[0], ks[1], ks[2])
}

fn complexity_level(score: f64) -> u8 {
    if score >= 0.7 {
        2
    } else if score >= 0.4 {
        1
    } else {
        0
    }
}

fn sanitize_epsilon(epsilon: f64) -> f64 {
    if epsilon.is_finite() {
        epsilon.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::allocator::{KAllocator, PlanOrigin};
    use std::sync::Arc;

    fn settings() -> KAllocSettings {
        KAllocSettings {
            tuner_enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_unpulled_arms_tried_in_order() {
        let tuner = BanditTuner::with_seed(0.0, 7);
        let s = settings();
        let request = AllocationRequest::new("plain question");
        let baseline = SourcePlan {
            web_k: 6,
            vector_k: 6,
            kg_k: 6,
            pool_limit: 18,
        };

        let mut seen = Vec::new();
        for _ in 0..5 {
            let tuned = tuner.tune(&request, &baseline, &s).unwrap();
            seen.push(tuned.ticket.arm);
            tuner.feedback(&tuned.ticket, 0.5);
        }
        assert_eq!(seen, Arm::ALL.to_vec());
    }

    #[test]
    fn test_best_arm_exploited() {
        let tuner = BanditTuner::with_seed(0.0, 7);
        let s = settings();
        let request = AllocationRequest::new("plain question");
        let tile = BanditTuner::tile_for(&request, &s);

        for arm in Arm::ALL {
            let reward = if arm == Arm::VectorHeavy { 1.0 } else { 0.0 };
            for _ in 0..20 {
                tuner.feedback(&TunerTicket { tile, arm }, reward);
            }
        }

        let baseline = SourcePlan::default();
        let tuned = tuner.tune(&request, &baseline, &s).unwrap();
        assert_eq!(tuned.ticket.arm, Arm::VectorHeavy);
        assert_eq!(tuner.pulls(tile, Arm::VectorHeavy), 20);
        assert!((tuner.mean_reward(tile, Arm::VectorHeavy) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cooling_source_shifted_to_floor() {
        let (w, v, k) = shift_from_cooling(6, 6, 6, &[SourceTag::Web], &settings());
        assert_eq!(w, 2);
        assert_eq!(v + k, 16);
    }

    #[test]
    fn test_tiles_separate_contexts() {
        let s = settings();
        let a = AllocationRequest::new("latest patch notes");
        let b = AllocationRequest::new("explain recursion");
        assert_ne!(BanditTuner::tile_for(&a, &s), BanditTuner::tile_for(&b, &s));
    }

    #[test]
    fn test_allocator_normalizes_tuned_plan() {
        let tuner = Arc::new(BanditTuner::with_seed(0.0, 1));
        let mut s = settings();
        s.complexity_scaling = true;
        let allocator = KAllocator::new(s.clone()).with_tuner(tuner);

        let mut request = AllocationRequest::new("compare every release ever");
        request.complexity = 1.0;
        for _ in 0..10 {
            let decision = allocator.decide(&request);
            assert_eq!(decision.origin, PlanOrigin::Tuned);
            assert!(decision.ticket.is_some());
            let plan = decision.plan;
            assert!(plan.total() <= s.max_total_k);
            assert!(plan.web_k >= s.min_per_source);
            assert!(plan.vector_k >= s.min_per_source);
            assert!(plan.kg_k >= s.min_per_source);
        }
    }

    #[test]
    fn test_feedback_ignores_nan() {
        let tuner = BanditTuner::with_seed(0.0, 1);
        let ticket = TunerTicket {
            tile: 1,
            arm: Arm::Base,
        };
        tuner.feedback(&ticket, f64::NAN);
        assert_eq!(tuner.pulls(1, Arm::Base), 1);
        assert_eq!(tuner.mean_reward(1, Arm::Base), 0.0);
    }
}
