//! Per-query evidence accumulator

use crate::types::document::ScoredDocument;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered, append-only evidence for one query.
///
/// Stages only ever push. The fusion/repair step is the single place that
/// swaps the fused segment in via [`EvidenceAccumulator::append_fused`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAccumulator {
    docs: Vec<ScoredDocument>,
}

impl EvidenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, doc: ScoredDocument) {
        self.docs.push(doc);
    }

    pub fn extend<I>(&mut self, docs: I)
    where
        I: IntoIterator<Item = ScoredDocument>,
    {
        self.docs.extend(docs);
    }

    /// Append the output of fusion + repair
    pub fn append_fused(&mut self, fused: Vec<ScoredDocument>) {
        self.docs.extend(fused);
    }

    pub fn documents(&self) -> &[ScoredDocument] {
        &self.docs
    }

    pub fn into_documents(self) -> Vec<ScoredDocument> {
        self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// First occurrence of every normalized text, order preserved
    pub fn deduplicated(&self) -> Vec<ScoredDocument> {
        let mut seen = HashSet::new();
        self.docs
            .iter()
            .filter(|d| seen.insert(d.normalized_key()))
            .cloned()
            .collect()
    }
}

impl IntoIterator for EvidenceAccumulator {
    type Item = ScoredDocument;
    type IntoIter = std::vec::IntoIter<ScoredDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::SourceTag;

    #[test]
    fn test_append_preserves_order() {
        let mut acc = EvidenceAccumulator::new();
        acc.push(ScoredDocument::new("a", SourceTag::Memory, 1.0));
        acc.extend(vec![
            ScoredDocument::new("b", SourceTag::Lore, 1.0),
            ScoredDocument::new("c", SourceTag::Web, 0.5),
        ]);

        let texts: Vec<_> = acc.documents().iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_deduplicated_view() {
        let mut acc = EvidenceAccumulator::new();
        acc.push(ScoredDocument::new("same  text", SourceTag::Web, 0.3));
        acc.push(ScoredDocument::new("same text", SourceTag::Vector, 0.9));
        acc.push(ScoredDocument::new("other", SourceTag::Kg, 0.1));

        let dedup = acc.deduplicated();
        assert_eq!(dedup.len(), 2);
        assert_eq!(dedup[0].source, SourceTag::Web);
        assert_eq!(acc.len(), 3);
    }
}
