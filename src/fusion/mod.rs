//! Rank fusion engine
//!
//! Turns independently ranked per-source lists into one ordered list.
//! Every function here is total: bad weights, NaN scores and empty
//! input all produce a valid (possibly empty) result.

pub mod calibration;
pub mod power_mean;
pub mod recency;
pub mod rrf;

pub use calibration::ScoreCalibrator;
pub use power_mean::{power_mean, weighted_power_mean};
pub use recency::{recency, weigh, AuthorityConfig, AuthorityTier, QueryClass, RecencyConfig};
pub use rrf::{RankedList, WeightedRrfFuser, DEFAULT_RRF_K};

use crate::types::{ScoredDocument, SourceTag};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Fusion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub rrf_k: f64,
    pub web_weight: f64,
    pub vector_weight: f64,
    pub kg_weight: f64,

    /// Re-order each list by calibrated, authority/recency weighted score
    /// before fusing
    pub prerank: bool,

    pub calibration: ScoreCalibrator,
    pub recency: RecencyConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            web_weight: 1.0,
            vector_weight: 1.0,
            kg_weight: 1.0,
            prerank: false,
            calibration: ScoreCalibrator::default(),
            recency: RecencyConfig::default(),
        }
    }
}

impl FusionConfig {
    pub fn weight_for(&self, source: SourceTag) -> f64 {
        match source {
            SourceTag::Web => self.web_weight,
            SourceTag::Vector => self.vector_weight,
            SourceTag::Kg => self.kg_weight,
            SourceTag::Memory | SourceTag::Lore => 1.0,
        }
    }
}

/// Fusion engine: optional pre-rank, then weighted RRF
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
    authority: AuthorityConfig,
    fuser: WeightedRrfFuser,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, authority: AuthorityConfig) -> Self {
        let fuser = WeightedRrfFuser::new(config.rrf_k);
        Self {
            config,
            authority,
            fuser,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn authority(&self) -> &AuthorityConfig {
        &self.authority
    }

    /// Fuse per-source buffers in the order given. Empty buffers are ignored.
    pub fn fuse(
        &self,
        buffers: Vec<(SourceTag, Vec<ScoredDocument>)>,
        top_k: usize,
        class: QueryClass,
        now: i64,
    ) -> Vec<ScoredDocument> {
        let lists: Vec<RankedList> = buffers
            .into_iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(source, docs)| {
                let docs = if self.config.prerank {
                    self.prerank(docs, class, now)
                } else {
                    docs
                };
                RankedList::new(source, docs).with_weight(self.config.weight_for(source))
            })
            .collect();

        if lists.is_empty() {
            return Vec::new();
        }

        let fused = self.fuser.fuse(&lists, top_k);
        debug!(
            lists = lists.len(),
            top_k = top_k,
            fused = fused.len(),
            "Weighted RRF applied"
        );
        fused
    }

    /// Calibrated + weighed score for a single document
    pub fn adjusted_score(&self, doc: &ScoredDocument, class: QueryClass, now: i64) -> f64 {
        let calibrated = self.config.calibration.calibrate(doc.score);
        weigh(
            calibrated,
            self.authority.tier_of(doc),
            doc.timestamp(),
            self.config.recency.alpha_for(class),
            now,
            self.config.recency.window_days,
        )
    }

    /// Stable re-sort of one list by adjusted score
    fn prerank(&self, docs: Vec<ScoredDocument>, class: QueryClass, now: i64) -> Vec<ScoredDocument> {
        let mut scored: Vec<(f64, ScoredDocument)> = docs
            .into_iter()
            .map(|d| (self.adjusted_score(&d, class, now), d))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.into_iter().map(|(_, d)| d).collect()
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default(), AuthorityConfig::default())
    }
}
