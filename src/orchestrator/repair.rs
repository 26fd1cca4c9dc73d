//! Evidence repair
//!
//! Optional last pass over the fused list: an official-only requery through
//! a repair search adapter, merged without duplicates, then a stable
//! re-order that puts the repair domain and preferred domains first.
//! Never fails; on any error the input comes back unchanged.

use crate::cancel::CancellationToken;
use crate::orchestrator::stage::{run_stage, StageOutcome};
use crate::sources::SourceAdapter;
use crate::types::{Query, QueryHints, ScoredDocument};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,

    /// Domain whose documents always go first
    pub repair_domain: Option<String>,

    /// Domains ranked next, in this order
    pub preferred_domains: Vec<String>,

    /// Maximum documents added by the requery
    pub max_extra: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repair_domain: None,
            preferred_domains: Vec::new(),
            max_extra: 3,
        }
    }
}

/// Result of one repair pass
#[derive(Debug)]
pub struct RepairOutcome {
    pub docs: Vec<ScoredDocument>,
    pub added: usize,
    pub failure: Option<StageOutcome<()>>,
    pub cancelled: bool,
}

impl RepairOutcome {
    fn unchanged(docs: Vec<ScoredDocument>) -> Self {
        Self {
            docs,
            added: 0,
            failure: None,
            cancelled: false,
        }
    }
}

pub struct EvidenceRepairer {
    config: RepairConfig,
    search: Option<Arc<dyn SourceAdapter>>,
}

impl EvidenceRepairer {
    pub fn new(config: RepairConfig, search: Option<Arc<dyn SourceAdapter>>) -> Self {
        Self { config, search }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn search_name(&self) -> Option<&str> {
        self.search.as_ref().map(|s| s.name())
    }

    pub async fn repair(
        &self,
        query: &Query,
        docs: Vec<ScoredDocument>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RepairOutcome {
        if !self.config.enabled {
            return RepairOutcome::unchanged(docs);
        }

        let mut merged = docs.clone();
        let mut added = 0;

        if let Some(search) = &self.search {
            let requery = Query {
                text: query.text.clone(),
                hints: QueryHints {
                    official_only: true,
                    ..query.hints.clone()
                },
                session_id: query.session_id.clone(),
            };

            let outcome = run_stage("repair", timeout, cancel, search.retrieve(&requery)).await;
            match outcome {
                StageOutcome::Completed(extra) => {
                    let mut seen: HashSet<String> = merged.iter().map(|d| d.normalized_key()).collect();
                    for doc in extra {
                        if added >= self.config.max_extra {
                            break;
                        }
                        if seen.insert(doc.normalized_key()) {
                            merged.push(doc);
                            added += 1;
                        }
                    }
                }
                StageOutcome::Cancelled => {
                    return RepairOutcome {
                        docs,
                        added: 0,
                        failure: None,
                        cancelled: true,
                    };
                }
                other => {
                    return RepairOutcome {
                        docs,
                        added: 0,
                        failure: Some(strip(other)),
                        cancelled: false,
                    };
                }
            }
        }

        self.sort_by_domain(&mut merged);
        RepairOutcome {
            docs: merged,
            added,
            failure: None,
            cancelled: false,
        }
    }

    /// Stable sort: repair domain, then preferred domains in order, then the rest
    pub fn sort_by_domain(&self, docs: &mut [ScoredDocument]) {
        let repair = self
            .config
            .repair_domain
            .as_deref()
            .map(|d| d.trim().to_lowercase());
        let preferred: Vec<String> = self
            .config
            .preferred_domains
            .iter()
            .map(|d| d.trim().to_lowercase())
            .collect();

        if repair.is_none() && preferred.is_empty() {
            return;
        }

        let rank = |doc: &ScoredDocument| -> usize {
            let domain = match doc.domain() {
                Some(d) => d,
                None => return usize::MAX,
            };
            let matches = |want: &str| domain == want || domain.ends_with(&format!(".{}", want));
            if let Some(r) = &repair {
                if matches(r.as_str()) {
                    return 0;
                }
            }
            preferred
                .iter()
                .position(|p| matches(p.as_str()))
                .map(|i| i + 1)
                .unwrap_or(usize::MAX)
        };

        docs.sort_by_key(|d| rank(d));
    }
}

/// Drop the payload type so the failure can be reported uniformly
fn strip<T>(outcome: StageOutcome<T>) -> StageOutcome<()> {
    match outcome {
        StageOutcome::Completed(_) => StageOutcome::Completed(()),
        StageOutcome::Failed(e) => StageOutcome::Failed(e),
        StageOutcome::TimedOut(d) => StageOutcome::TimedOut(d),
        StageOutcome::Cancelled => StageOutcome::Cancelled,
        StageOutcome::Skipped(r) => StageOutcome::Skipped(r),
    }
}
