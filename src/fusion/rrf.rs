//! Weighted reciprocal rank fusion
//!
//! score(d) = Σ_lists weight / (k + rank), rank starting at 1. Documents
//! are merged by normalized text. Ties are broken by best original rank,
//! then by the position of the first contributing list, then by
//! first-seen order, so the output is fully deterministic.

use crate::types::{ScoredDocument, SourceTag};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Standard RRF smoothing constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One source's ranked result list
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    pub source: SourceTag,
    pub weight: f64,
    pub docs: Vec<ScoredDocument>,
}

impl RankedList {
    pub fn new(source: SourceTag, docs: Vec<ScoredDocument>) -> Self {
        Self {
            source,
            weight: 1.0,
            docs,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug)]
struct Candidate {
    doc: ScoredDocument,
    score: f64,
    best_rank: usize,
    list_index: usize,
    first_seen: usize,
    sources: Vec<SourceTag>,
}

/// Weighted RRF fuser
#[derive(Debug, Clone, Copy)]
pub struct WeightedRrfFuser {
    k: f64,
}

impl Default for WeightedRrfFuser {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl WeightedRrfFuser {
    /// Non-finite or non-positive k falls back to 60
    pub fn new(k: f64) -> Self {
        let k = if k.is_finite() && k > 0.0 { k } else { DEFAULT_RRF_K };
        Self { k }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    /// Fuse the lists into at most `top_k` (floor 1) new documents
    pub fn fuse(&self, lists: &[RankedList], top_k: usize) -> Vec<ScoredDocument> {
        let top_k = top_k.max(1);
        let mut by_key: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for (list_index, list) in lists.iter().enumerate() {
            let weight = sanitize_weight(list.weight);

            for (pos, doc) in list.docs.iter().enumerate() {
                let rank = pos + 1;
                let contribution = weight / (self.k + rank as f64);
                let key = doc.normalized_key();

                match by_key.get(&key) {
                    Some(&idx) => {
                        let cand = &mut candidates[idx];
                        cand.score += contribution;
                        cand.best_rank = cand.best_rank.min(rank);
                        if !cand.sources.contains(&list.source) {
                            cand.sources.push(list.source);
                        }
                    }
                    None => {
                        by_key.insert(key, candidates.len());
                        candidates.push(Candidate {
                            doc: doc.clone(),
                            score: contribution,
                            best_rank: rank,
                            list_index,
                            first_seen: candidates.len(),
                            sources: vec![list.source],
                        });
                    }
                }
            }
        }

        candidates.sort_by(compare_candidates);
        candidates.truncate(top_k);

        candidates
            .into_iter()
            .map(|cand| {
                let mut doc = cand.doc;
                doc.score = cand.score;
                doc.metadata.insert("rrf.score".to_string(), Value::from(cand.score));
                doc.metadata.insert(
                    "rrf.sources".to_string(),
                    Value::from(
                        cand.sources
                            .iter()
                            .map(|s| s.as_str().to_string())
                            .collect::<Vec<_>>(),
                    ),
                );
                doc
            })
            .collect()
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.best_rank.cmp(&b.best_rank))
        .then_with(|| a.list_index.cmp(&b.list_index))
        .then_with(|| a.first_seen.cmp(&b.first_seen))
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        1.0
    }
}
