//! Recency and authority re-weighting
//!
//! `s' = (1 − α)·(s · authority(tier)) + α · recency(ts)`, where recency
//! decays linearly to zero over a fixed window.

use crate::fusion::calibration::clamp01;
use crate::types::ScoredDocument;
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: f64 = 86_400.0;

/// Source authority tier, T1 most trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityTier {
    T1,
    T2,
    T3,
    T4,
}

impl AuthorityTier {
    pub fn weight(&self) -> f64 {
        match self {
            AuthorityTier::T1 => 1.0,
            AuthorityTier::T2 => 0.85,
            AuthorityTier::T3 => 0.7,
            AuthorityTier::T4 => 0.5,
        }
    }
}

/// Domain lists per tier; unknown domains are T4
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub t1: Vec<String>,
    pub t2: Vec<String>,
    pub t3: Vec<String>,
}

impl AuthorityConfig {
    /// Tier for a host; subdomains inherit their parent's tier
    pub fn tier_for(&self, domain: &str) -> AuthorityTier {
        let domain = domain.trim().to_lowercase();
        let matches = |list: &[String]| {
            list.iter().any(|d| {
                let d = d.trim().to_lowercase();
                !d.is_empty() && (domain == d || domain.ends_with(&format!(".{}", d)))
            })
        };

        if matches(&self.t1) {
            AuthorityTier::T1
        } else if matches(&self.t2) {
            AuthorityTier::T2
        } else if matches(&self.t3) {
            AuthorityTier::T3
        } else {
            AuthorityTier::T4
        }
    }

    pub fn tier_of(&self, doc: &ScoredDocument) -> AuthorityTier {
        doc.domain()
            .map(|d| self.tier_for(&d))
            .unwrap_or(AuthorityTier::T4)
    }
}

/// Recency window and per-class mixing weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    pub window_days: f64,
    pub alpha_default: f64,
    pub alpha_recency: f64,
    pub alpha_official: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            window_days: 180.0,
            alpha_default: 0.2,
            alpha_recency: 0.5,
            alpha_official: 0.1,
        }
    }
}

/// Query class that selects α
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Default,
    Recency,
    Official,
}

impl RecencyConfig {
    pub fn alpha_for(&self, class: QueryClass) -> f64 {
        let alpha = match class {
            QueryClass::Default => self.alpha_default,
            QueryClass::Recency => self.alpha_recency,
            QueryClass::Official => self.alpha_official,
        };
        clamp01(alpha)
    }
}

/// Linear decay: 1 at `now`, 0 at `window_days` old; future stamps count as fresh
pub fn recency(ts: i64, now: i64, window_days: f64) -> f64 {
    if !window_days.is_finite() || window_days <= 0.0 {
        return 0.0;
    }
    if ts >= now {
        return 1.0;
    }
    let age_days = (now - ts) as f64 / SECS_PER_DAY;
    clamp01(1.0 - age_days / window_days)
}

/// Blend a score with authority and recency; result in [0, 1].
///
/// Documents without a timestamp get recency 0.
pub fn weigh(score: f64, tier: AuthorityTier, ts: Option<i64>, alpha: f64, now: i64, window_days: f64) -> f64 {
    let alpha = clamp01(alpha);
    let s = clamp01(score);
    let r = ts.map(|t| recency(t, now, window_days)).unwrap_or(0.0);
    clamp01((1.0 - alpha) * (s * tier.weight()) + alpha * r)
}
