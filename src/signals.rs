//! Evidence signal extraction
//!
//! Summary statistics over the final evidence set. Used for telemetry and
//! as the reward fed back to the K tuner; never influences ranking.

use crate::fusion::{weighted_power_mean, AuthorityConfig};
use crate::types::ScoredDocument;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Weights of (authority, coverage, novelty) in the quality blend
const QUALITY_WEIGHTS: [f64; 3] = [0.4, 0.4, 0.2];

/// Exponent of the quality blend; below 1 so one weak signal drags it down
const QUALITY_P: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSignals {
    pub doc_count: usize,

    /// Mean authority-tier weight over documents
    pub authority_avg: f64,

    /// Share of documents whose normalized text repeats an earlier one
    pub duplicate_ratio: f64,

    /// Share of query tokens (len >= 2) found in at least one document
    pub coverage_score: f64,
}

impl EvidenceSignals {
    pub fn extract(query_text: &str, docs: &[ScoredDocument], authority: &AuthorityConfig) -> Self {
        if docs.is_empty() {
            return Self::default();
        }

        let authority_avg = docs
            .iter()
            .map(|d| authority.tier_of(d).weight())
            .sum::<f64>()
            / docs.len() as f64;

        let mut seen = HashSet::new();
        let duplicates = docs.iter().filter(|d| !seen.insert(d.normalized_key())).count();
        let duplicate_ratio = duplicates as f64 / docs.len() as f64;

        Self {
            doc_count: docs.len(),
            authority_avg,
            duplicate_ratio,
            coverage_score: coverage(query_text, docs),
        }
    }

    /// Blend of authority, coverage and novelty in [0, 1]
    pub fn quality(&self) -> f64 {
        if self.doc_count == 0 {
            return 0.0;
        }
        let novelty = 1.0 - self.duplicate_ratio;
        weighted_power_mean(
            &[self.authority_avg, self.coverage_score, novelty],
            &QUALITY_WEIGHTS,
            QUALITY_P,
        )
    }
}

fn coverage(query_text: &str, docs: &[ScoredDocument]) -> f64 {
    let tokens: HashSet<String> = query_text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect();

    if tokens.is_empty() {
        return 0.0;
    }

    let corpus: Vec<String> = docs.iter().map(|d| d.text.to_lowercase()).collect();
    let covered = tokens
        .iter()
        .filter(|t| corpus.iter().any(|text| text.contains(t.as_str())))
        .count();

    covered as f64 / tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTag;

    #[test]
    fn test_empty_evidence() {
        let signals = EvidenceSignals::extract("query", &[], &AuthorityConfig::default());
        assert_eq!(signals, EvidenceSignals::default());
        assert_eq!(signals.quality(), 0.0);
    }

    #[test]
    fn test_duplicates_and_coverage() {
        let docs = vec![
            ScoredDocument::new("Furina is the Hydro Archon", SourceTag::Web, 0.9),
            ScoredDocument::new("furina  is the hydro archon", SourceTag::Vector, 0.5),
            ScoredDocument::new("Fontaine region", SourceTag::Kg, 0.4),
            ScoredDocument::new("unrelated", SourceTag::Kg, 0.1),
        ];
        let signals = EvidenceSignals::extract("furina hydro weapons", &docs, &AuthorityConfig::default());

        assert_eq!(signals.doc_count, 4);
        assert!((signals.duplicate_ratio - 0.0).abs() < 1e-12);
        assert!((signals.coverage_score - 2.0 / 3.0).abs() < 1e-12);
        assert!((signals.authority_avg - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_exact_duplicates_counted() {
        let docs = vec![
            ScoredDocument::new("same", SourceTag::Web, 0.9),
            ScoredDocument::new(" same ", SourceTag::Vector, 0.5),
        ];
        let signals = EvidenceSignals::extract("same", &docs, &AuthorityConfig::default());
        assert!((signals.duplicate_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_quality_bounded_and_monotone_in_authority() {
        let docs = vec![ScoredDocument::new("alpha beta", SourceTag::Web, 0.9)
            .with_meta("url", "https://trusted.org/x")];
        let weak = EvidenceSignals::extract("alpha beta", &docs, &AuthorityConfig::default());
        let strong = EvidenceSignals::extract(
            "alpha beta",
            &docs,
            &AuthorityConfig {
                t1: vec!["trusted.org".to_string()],
                ..Default::default()
            },
        );
        assert!(weak.quality() > 0.0 && weak.quality() <= 1.0);
        assert!(strong.quality() > weak.quality());
    }
}
