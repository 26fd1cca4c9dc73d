//! Dynamic source ordering
//!
//! `fixed` always returns WEB → VECTOR → KG. `heuristic` looks, in order,
//! at cheap-path modes, official-only, cooldowns, query length and
//! factoid shape. An explicit `retrieval.order` hint beats both modes.

use crate::cooldown::FailureCooldown;
use crate::types::{Query, SourceTag};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

use SourceTag::{Kg, Vector, Web};

/// Queries at least this long go vector-first
const LONG_QUERY_CHARS: usize = 120;

/// Max length of a "short direct question"
const SHORT_QUESTION_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    Fixed,
    #[default]
    Heuristic,
}

/// Chosen order and the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDecision {
    pub order: Vec<SourceTag>,
    pub reason: String,
}

impl OrderDecision {
    fn new(order: [SourceTag; 3], reason: &str) -> Self {
        Self {
            order: order.to_vec(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalOrderService {
    mode: OrderMode,
}

impl RetrievalOrderService {
    pub fn new(mode: OrderMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OrderMode {
        self.mode
    }

    pub fn decide(&self, query: &Query, cooldown: &dyn FailureCooldown) -> OrderDecision {
        let hints = &query.hints;

        if let Some(explicit) = &hints.retrieval_order {
            let mut order: Vec<SourceTag> = Vec::new();
            for tag in explicit {
                if tag.is_heavy() && !order.contains(tag) && !hints.source_disabled(*tag) {
                    order.push(*tag);
                }
            }
            return OrderDecision {
                order,
                reason: "explicit".to_string(),
            };
        }

        if self.mode == OrderMode::Fixed {
            return OrderDecision::new([Web, Vector, Kg], "fixed");
        }

        if hints.cheap_mode() {
            return OrderDecision::new([Vector, Kg, Web], "cheap_mode");
        }
        if hints.official_only {
            return OrderDecision::new([Web, Vector, Kg], "official_only");
        }

        let web_cd = cooling(cooldown, "web");
        let vec_cd = cooling(cooldown, "vector");
        match (web_cd, vec_cd) {
            (true, false) => return OrderDecision::new([Vector, Kg, Web], "web_cooldown"),
            (false, true) => return OrderDecision::new([Web, Kg, Vector], "vector_cooldown"),
            (true, true) => return OrderDecision::new([Kg, Vector, Web], "web_vector_cooldown"),
            (false, false) => {}
        }

        let text = query.text.trim();
        if text.chars().count() >= LONG_QUERY_CHARS {
            return OrderDecision::new([Vector, Web, Kg], "long_query");
        }
        if looks_like_factoid(text) {
            return OrderDecision::new([Kg, Web, Vector], "factoid");
        }

        OrderDecision::new([Web, Vector, Kg], "default")
    }
}

fn cooling(cooldown: &dyn FailureCooldown, source: &str) -> bool {
    catch_unwind(AssertUnwindSafe(|| cooldown.is_cooling_down(source))).unwrap_or(false)
}

/// Wh-words, Korean interrogatives, or a short text with a question mark
pub fn looks_like_factoid(text: &str) -> bool {
    const WH: [&str; 6] = ["what", "who", "when", "where", "why", "how"];
    const KO: [&str; 7] = ["뭐", "무엇", "누구", "언제", "어디", "왜", "어떻게"];

    let lower = text.to_lowercase();
    if lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| WH.contains(&tok))
    {
        return true;
    }
    if KO.iter().any(|k| lower.contains(k)) {
        return true;
    }
    lower.chars().count() <= SHORT_QUESTION_CHARS && lower.contains('?')
}
