//! K-allocation type definitions

use serde::{Deserialize, Serialize};

/// Settings for the per-request K allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KAllocSettings {
    /// When false the static defaults are used unchanged
    pub enabled: bool,

    /// Upper bound for web_k + vector_k + kg_k (default: 24)
    pub max_total_k: usize,

    /// Lower bound for every enabled source (default: 2)
    pub min_per_source: usize,

    /// Step used for biasing a source up or down (default: 4)
    pub k_step: usize,

    /// Balanced baseline per source (default: 6)
    pub base_per_source: usize,

    /// pool_limit >= max(K) * pool_multiplier (default: 2)
    pub pool_multiplier: usize,

    /// Keywords that signal a need for fresh information
    pub recency_keywords: Vec<String>,

    /// Intents that favour the vector index
    pub vector_intents: Vec<String>,

    /// Intents that favour the knowledge graph
    pub kg_intents: Vec<String>,

    /// Static defaults used when allocation is disabled or fails
    pub default_web_k: usize,
    pub default_vector_k: usize,
    pub default_kg_k: usize,

    /// Route allocation through the learning tuner when one is attached
    pub tuner_enabled: bool,

    /// Scale the total budget with query complexity in the tuner
    pub complexity_scaling: bool,

    /// Exploration rate of the bandit tuner (default: 0.1)
    pub epsilon: f64,
}

impl Default for KAllocSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_total_k: 24,
            min_per_source: 2,
            k_step: 4,
            base_per_source: 6,
            pool_multiplier: 2,
            recency_keywords: [
                "최근", "오늘", "업데이트", "발표", "발매", "release", "today", "latest", "최신",
                "패치", "news",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vector_intents: ["faq", "docs", "definition", "howto", "explain"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            kg_intents: ["relation", "entity", "comparison", "lore", "factoid"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_web_k: 5,
            default_vector_k: 5,
            default_kg_k: 5,
            tuner_enabled: false,
            complexity_scaling: false,
            epsilon: 0.1,
        }
    }
}

impl KAllocSettings {
    /// Max total that can always honour min_per_source for three sources
    pub fn effective_max_total(&self) -> usize {
        self.max_total_k.max(3 * self.min_per_source)
    }

    pub fn static_plan(&self) -> SourcePlan {
        let max_k = self
            .default_web_k
            .max(self.default_vector_k)
            .max(self.default_kg_k);
        let sum = self.default_web_k + self.default_vector_k + self.default_kg_k;
        SourcePlan {
            web_k: self.default_web_k,
            vector_k: self.default_vector_k,
            kg_k: self.default_kg_k,
            pool_limit: (max_k * self.pool_multiplier.max(1)).max(sum),
        }
    }
}

/// How many results to request from each heavy source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePlan {
    pub web_k: usize,
    pub vector_k: usize,
    pub kg_k: usize,

    /// Ceiling on the candidate pool handed to fusion
    pub pool_limit: usize,
}

impl SourcePlan {
    pub fn total(&self) -> usize {
        self.web_k + self.vector_k + self.kg_k
    }

    pub fn max_k(&self) -> usize {
        self.web_k.max(self.vector_k).max(self.kg_k)
    }

    pub fn k_for(&self, source: crate::types::SourceTag) -> usize {
        use crate::types::SourceTag;
        match source {
            SourceTag::Web => self.web_k,
            SourceTag::Vector => self.vector_k,
            SourceTag::Kg => self.kg_k,
            SourceTag::Memory | SourceTag::Lore => 0,
        }
    }
}

/// Inputs for one allocation decision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationRequest {
    pub intent: Option<String>,
    pub query_text: String,
    pub official_only: bool,

    /// Complexity score in [0, 1], used by the tuner
    pub complexity: f64,

    pub web_disabled: bool,
    pub rag_disabled: bool,

    /// Heavy sources currently cooling down
    pub cooling: Vec<crate::types::SourceTag>,

    pub pinned_web_k: Option<usize>,
    pub pinned_vector_k: Option<usize>,
    pub pinned_kg_k: Option<usize>,
    pub pinned_pool_limit: Option<usize>,
}

impl AllocationRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Default::default()
        }
    }

    /// Build from a query's text and hints
    pub fn from_query(query: &crate::types::Query, complexity: f64) -> Self {
        let hints = &query.hints;
        Self {
            intent: hints.intent_domain.clone(),
            query_text: query.text.clone(),
            official_only: hints.official_only,
            complexity,
            web_disabled: hints.allow_web == Some(false),
            rag_disabled: hints.allow_rag == Some(false),
            cooling: Vec::new(),
            pinned_web_k: hints.web_top_k,
            pinned_vector_k: hints.vector_top_k,
            pinned_kg_k: hints.kg_top_k,
            pinned_pool_limit: hints.pool_limit,
        }
    }
}
