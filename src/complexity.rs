//! Query complexity gate
//!
//! Multi-factor keyword scoring with bounded output:
//! - Bounded: score ∈ [0.0, 1.0]
//! - Monotonic in each factor
//! - Self-ask runs on Ambiguous and above, analyze on Complex only

use crate::types::Query;
use serde::{Deserialize, Serialize};

/// Coarse complexity classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComplexityLevel {
    Simple,
    Ambiguous,
    Complex,
}

/// Score plus class for one query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    pub score: f64,
    pub level: ComplexityLevel,
}

/// Decides whether the assistive LLM stages are worth running
pub trait ComplexityGate: Send + Sync {
    fn assess(&self, query: &Query) -> ComplexityAssessment;

    fn needs_self_ask(&self, query: &Query) -> bool {
        self.assess(query).level >= ComplexityLevel::Ambiguous
    }

    fn needs_analyze(&self, query: &Query) -> bool {
        self.assess(query).level == ComplexityLevel::Complex
    }
}

/// Keyword-based estimator with 4-factor weighted scoring
pub struct HeuristicComplexityGate {
    /// Weight for query length factor (0.20)
    weight_length: f64,

    /// Weight for multi-part factor (0.30)
    weight_multipart: f64,

    /// Weight for reasoning factor (0.30)
    weight_reasoning: f64,

    /// Weight for ambiguity factor (0.20)
    weight_ambiguity: f64,

    /// Lower bound of the Ambiguous class
    ambiguous_threshold: f64,

    /// Lower bound of the Complex class
    complex_threshold: f64,
}

impl HeuristicComplexityGate {
    /// Create new gate with standard weights
    pub fn new() -> Self {
        Self {
            weight_length: 0.20,
            weight_multipart: 0.30,
            weight_reasoning: 0.30,
            weight_ambiguity: 0.20,
            ambiguous_threshold: 0.3,
            complex_threshold: 0.6,
        }
    }

    /// Estimate complexity of a query text
    ///
    /// Formula:
    /// complexity = 0.20 × length + 0.30 × multipart
    ///            + 0.30 × reasoning + 0.20 × ambiguity
    pub fn estimate(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();

        let complexity = self.weight_length * length_factor(text)
            + self.weight_multipart * multipart_factor(&lower)
            + self.weight_reasoning * reasoning_factor(&lower)
            + self.weight_ambiguity * ambiguity_factor(&lower);

        complexity.clamp(0.0, 1.0)
    }

    /// Classify complexity level
    pub fn classify(&self, complexity: f64) -> ComplexityLevel {
        if complexity < self.ambiguous_threshold {
            ComplexityLevel::Simple
        } else if complexity < self.complex_threshold {
            ComplexityLevel::Ambiguous
        } else {
            ComplexityLevel::Complex
        }
    }
}

impl Default for HeuristicComplexityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityGate for HeuristicComplexityGate {
    fn assess(&self, query: &Query) -> ComplexityAssessment {
        let score = self.estimate(&query.text);
        ComplexityAssessment {
            score,
            level: self.classify(score),
        }
    }
}

/// Length in characters, saturating at 200
fn length_factor(text: &str) -> f64 {
    (text.chars().count() as f64 / 200.0).min(1.0)
}

/// Conjunctions and comparisons
fn multipart_factor(lower: &str) -> f64 {
    const MARKERS: [&str; 12] = [
        " and ", " vs", "versus", "compare", "difference", "그리고", "비교", "차이", "및", "또는",
        " or ", "각각",
    ];
    let hits = MARKERS.iter().filter(|m| lower.contains(*m)).count();
    let questions = lower.matches('?').count().saturating_sub(1);
    ((hits + questions) as f64 / 3.0).min(1.0)
}

/// Causal or procedural asks
fn reasoning_factor(lower: &str) -> f64 {
    const MARKERS: [&str; 12] = [
        "why", "how", "explain", "analyze", "analysis", "reason", "왜", "어떻게", "분석", "원인",
        "이유", "설명",
    ];
    let hits = MARKERS.iter().filter(|m| lower.contains(*m)).count();
    (hits as f64 / 2.0).min(1.0)
}

/// Vague references that need resolving
fn ambiguity_factor(lower: &str) -> f64 {
    const MARKERS: [&str; 10] = [
        "it ", "this", "that", "those", "something", "그거", "이거", "저거", "그것", "뭐",
    ];
    let hits = MARKERS.iter().filter(|m| lower.contains(*m)).count();
    (hits as f64 / 2.0).min(1.0)
}
