//! Query and typed hints
//!
//! Hints are the only channel stages use to talk to each other. The legacy
//! metadata map (camelCase keys) is parsed into [`QueryHints`]; anything not
//! recognised lands in `extra` and is carried along untouched.

use crate::types::document::SourceTag;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One user query plus its routing hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub hints: QueryHints,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hints: QueryHints::default(),
            session_id: None,
        }
    }

    pub fn with_hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Copy of this query with different text, hints preserved
    pub fn rewritten(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hints: self.hints.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// Typed routing hints.
///
/// `Option<bool>` switches distinguish "explicitly false" from "not set";
/// only an explicit `false` disables a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryHints {
    // Mode flags
    pub nightmare_mode: bool,
    pub aux_llm_down: bool,
    pub aux_degraded: bool,
    pub aux_hard_down: bool,
    pub strike_mode: bool,
    pub bypass_mode: bool,
    pub compression_mode: bool,
    pub web_rate_limited: bool,

    // Stage switches
    pub allow_web: Option<bool>,
    pub allow_rag: Option<bool>,
    pub enable_self_ask: Option<bool>,
    pub enable_analyze: Option<bool>,

    // K-allocation pins
    pub web_top_k: Option<usize>,
    pub vector_top_k: Option<usize>,
    pub kg_top_k: Option<usize>,
    pub pool_limit: Option<usize>,

    /// Explicit `retrieval.order` override
    pub retrieval_order: Option<Vec<SourceTag>>,

    pub official_only: bool,
    pub intent_domain: Option<String>,
    pub memory_off: bool,
    pub memory_mode: Option<String>,
    pub locale: Option<String>,

    /// Unrecognised keys, preserved verbatim
    pub extra: Map<String, Value>,
}

impl QueryHints {
    /// Parse the legacy metadata map.
    ///
    /// Never fails: malformed values are ignored and the key is kept in
    /// `extra` so nothing the caller sent is lost.
    pub fn from_metadata(meta: &Map<String, Value>) -> Self {
        let mut hints = QueryHints::default();

        for (key, value) in meta {
            let known = match key.as_str() {
                "nightmareMode" => set_flag(&mut hints.nightmare_mode, value),
                "auxLlmDown" => set_flag(&mut hints.aux_llm_down, value),
                "auxDegraded" => set_flag(&mut hints.aux_degraded, value),
                "auxHardDown" => set_flag(&mut hints.aux_hard_down, value),
                "strikeMode" => set_flag(&mut hints.strike_mode, value),
                "bypassMode" => set_flag(&mut hints.bypass_mode, value),
                "compressionMode" => set_flag(&mut hints.compression_mode, value),
                "webRateLimited" => set_flag(&mut hints.web_rate_limited, value),
                "officialOnly" => set_flag(&mut hints.official_only, value),
                "memoryOff" => set_flag(&mut hints.memory_off, value),

                "allowWeb" => set_switch(&mut hints.allow_web, value),
                "allowRag" => set_switch(&mut hints.allow_rag, value),
                "enableSelfAsk" => set_switch(&mut hints.enable_self_ask, value),
                "enableAnalyze" => set_switch(&mut hints.enable_analyze, value),

                "webTopK" => set_k(&mut hints.web_top_k, value),
                "vectorTopK" | "vecTopK" => set_k(&mut hints.vector_top_k, value),
                "kgTopK" => set_k(&mut hints.kg_top_k, value),
                "poolLimit" => set_k(&mut hints.pool_limit, value),

                "retrieval.order" => match parse_order(value) {
                    Some(order) => {
                        hints.retrieval_order = Some(order);
                        true
                    }
                    None => false,
                },

                "intent.domain" | "intentDomain" => set_string(&mut hints.intent_domain, value),
                "memoryMode" => set_string(&mut hints.memory_mode, value),
                "locale" => set_string(&mut hints.locale, value),

                _ => false,
            };

            if !known {
                hints.extra.insert(key.clone(), value.clone());
            }
        }

        hints
    }

    /// Any flag that takes the auxiliary LLM out of play
    pub fn aux_blocked(&self) -> bool {
        self.nightmare_mode
            || self.aux_llm_down
            || self.aux_degraded
            || self.aux_hard_down
            || self.strike_mode
            || self.bypass_mode
    }

    /// Cheap-path modes that prefer local sources first
    pub fn cheap_mode(&self) -> bool {
        self.strike_mode || self.compression_mode || self.bypass_mode || self.web_rate_limited
    }

    /// Memory mode equals the exploration mode, which skips session memory
    pub fn exploration_mode(&self) -> bool {
        self.memory_mode
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("exploration") || m.eq_ignore_ascii_case("explore"))
            .unwrap_or(false)
    }

    /// All three per-source K values are pinned by the caller
    pub fn k_fully_pinned(&self) -> bool {
        self.web_top_k.is_some() && self.vector_top_k.is_some() && self.kg_top_k.is_some()
    }

    /// Whether the caller disabled a source via `allowWeb` / `allowRag`
    pub fn source_disabled(&self, source: SourceTag) -> bool {
        match source {
            SourceTag::Web => self.allow_web == Some(false),
            SourceTag::Vector | SourceTag::Kg => self.allow_rag == Some(false),
            SourceTag::Memory | SourceTag::Lore => false,
        }
    }
}

/// Lenient boolean parsing: true/1/yes/y and false/0/no/n
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_order(value: &Value) -> Option<Vec<SourceTag>> {
    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => return None,
    };

    let order: Vec<SourceTag> = items.iter().filter_map(|s| s.parse().ok()).collect();
    if order.is_empty() {
        None
    } else {
        Some(order)
    }
}

fn set_flag(slot: &mut bool, value: &Value) -> bool {
    match parse_bool(value) {
        Some(b) => {
            *slot = b;
            true
        }
        None => false,
    }
}

fn set_switch(slot: &mut Option<bool>, value: &Value) -> bool {
    match parse_bool(value) {
        Some(b) => {
            *slot = Some(b);
            true
        }
        None => false,
    }
}

fn set_k(slot: &mut Option<usize>, value: &Value) -> bool {
    match parse_usize(value) {
        Some(k) => {
            *slot = Some(k);
            true
        }
        None => false,
    }
}

fn set_string(slot: &mut Option<String>, value: &Value) -> bool {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => {
            *slot = Some(s.trim().to_string());
            true
        }
        _ => false,
    }
}
