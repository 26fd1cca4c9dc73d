//! Scored documents and source tags

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Knowledge source a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceTag {
    Web,
    Vector,
    Kg,
    Memory,
    Lore,
}

impl SourceTag {
    /// The three heavy sources whose order is decided per request
    pub const HEAVY: [SourceTag; 3] = [SourceTag::Web, SourceTag::Vector, SourceTag::Kg];

    /// Canonical lower-case name, also used as the cooldown key
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Web => "web",
            SourceTag::Vector => "vector",
            SourceTag::Kg => "kg",
            SourceTag::Memory => "memory",
            SourceTag::Lore => "lore",
        }
    }

    /// Whether this is one of WEB, VECTOR, KG
    pub fn is_heavy(&self) -> bool {
        matches!(self, SourceTag::Web | SourceTag::Vector | SourceTag::Kg)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(SourceTag::Web),
            "vector" | "vec" | "rag" => Ok(SourceTag::Vector),
            "kg" | "graph" | "knowledge_graph" => Ok(SourceTag::Kg),
            "memory" => Ok(SourceTag::Memory),
            "lore" => Ok(SourceTag::Lore),
            other => Err(format!("unknown source tag: {}", other)),
        }
    }
}

/// A single piece of evidence produced by a source.
///
/// Treated as immutable once an adapter returns it; fusion and repair
/// build new documents instead of editing these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub text: String,
    pub source: SourceTag,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ScoredDocument {
    /// Create a document without metadata
    pub fn new(text: impl Into<String>, source: SourceTag, score: f64) -> Self {
        Self {
            text: text.into(),
            source,
            score,
            metadata: Map::new(),
        }
    }

    /// Builder-style metadata insert
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identity used for deduplication and fusion merging
    pub fn normalized_key(&self) -> String {
        normalize_text(&self.text)
    }

    /// String metadata lookup
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Host of the document's `url` metadata, or its explicit `domain`
    pub fn domain(&self) -> Option<String> {
        if let Some(domain) = self.meta_str("domain") {
            let d = domain.trim().trim_start_matches("www.").to_lowercase();
            if !d.is_empty() {
                return Some(d);
            }
        }
        self.meta_str("url").and_then(host_of)
    }

    /// Unix timestamp (seconds) from `timestamp` or `published_at` metadata
    pub fn timestamp(&self) -> Option<i64> {
        for key in ["timestamp", "published_at"] {
            match self.metadata.get(key) {
                Some(Value::Number(n)) => {
                    if let Some(ts) = n.as_i64() {
                        return Some(ts);
                    }
                }
                Some(Value::String(s)) => {
                    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                        return Some(dt.timestamp());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Collapse whitespace runs and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-case host of a URL, `www.` stripped.
///
/// Scheme-less input such as `example.com/page` is read as `http://`.
pub fn host_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match url::Url::parse(raw) {
        Ok(u) if u.has_host() => u,
        _ => url::Url::parse(&format!("http://{}", raw)).ok()?,
    };
    let host = parsed.host_str()?.trim_start_matches("www.").to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_key_collapses_whitespace() {
        let a = ScoredDocument::new("  hello   world\n", SourceTag::Web, 0.5);
        let b = ScoredDocument::new("hello world", SourceTag::Vector, 0.9);
        assert_eq!(a.normalized_key(), b.normalized_key());
    }

    #[test]
    fn test_source_tag_parse() {
        assert_eq!("WEB".parse::<SourceTag>().unwrap(), SourceTag::Web);
        assert_eq!("rag".parse::<SourceTag>().unwrap(), SourceTag::Vector);
        assert_eq!(" kg ".parse::<SourceTag>().unwrap(), SourceTag::Kg);
        assert!("ocr".parse::<SourceTag>().is_err());
    }

    #[test]
    fn test_domain_from_url() {
        let doc = ScoredDocument::new("x", SourceTag::Web, 0.1)
            .with_meta("url", "https://www.Example.com:8443/path?q=1");
        assert_eq!(doc.domain().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_host_of_edge_cases() {
        assert_eq!(host_of("http://[::1]:8080/").as_deref(), Some("[::1]"));
        assert_eq!(host_of("https://user:pw@Wiki.Example.org/a").as_deref(), Some("wiki.example.org"));
        assert_eq!(host_of("https://example.com\\path").as_deref(), Some("example.com"));
        assert_eq!(host_of("hoyolab.com/article/1").as_deref(), Some("hoyolab.com"));
        assert_eq!(host_of("   "), None);
        assert_eq!(host_of("mailto:someone"), None);
    }

    #[test]
    fn test_domain_prefers_explicit() {
        let doc = ScoredDocument::new("x", SourceTag::Web, 0.1)
            .with_meta("domain", "hoyolab.com")
            .with_meta("url", "https://other.org/");
        assert_eq!(doc.domain().as_deref(), Some("hoyolab.com"));
    }

    #[test]
    fn test_timestamp_parsing() {
        let doc = ScoredDocument::new("x", SourceTag::Web, 0.1).with_meta("timestamp", 1_700_000_000);
        assert_eq!(doc.timestamp(), Some(1_700_000_000));

        let doc = ScoredDocument::new("x", SourceTag::Web, 0.1)
            .with_meta("published_at", "2024-01-01T00:00:00Z");
        assert_eq!(doc.timestamp(), Some(1_704_067_200));
    }
}
