//! Static lore registry
//!
//! High-confidence domain knowledge loaded from TOML catalogs and matched
//! against query text or extracted entities before any heavy retrieval.
//!
//! ```toml
//! domain = "Genshin"
//!
//! [[entries]]
//! names = ["푸리나", "Furina"]
//! content = "..."
//! ```

use crate::errors::Result;
use crate::types::{ScoredDocument, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Maximum entries returned by one lookup
pub const MAX_LORE_MATCHES: usize = 6;

/// Minimum keyword length for substring matching
const MIN_SUBSTRING_KEY: usize = 3;

/// One knowledge entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreEntry {
    #[serde(default)]
    pub domain: Option<String>,
    pub names: Vec<String>,
    pub content: String,
}

impl LoreEntry {
    /// Evidence document for this entry
    pub fn to_document(&self) -> ScoredDocument {
        let domain = self.domain.as_deref().unwrap_or("General");
        let mut doc = ScoredDocument::new(
            format!("[Lore: {}] {}", domain, self.content),
            SourceTag::Lore,
            1.0,
        )
        .with_meta("source", "UniversalLore")
        .with_meta("lore.domain", domain);

        if let Some(name) = self.names.first() {
            doc = doc.with_meta("entity", name.as_str());
        }
        doc
    }
}

/// One catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreCatalog {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub entries: Vec<LoreEntry>,
}

/// Keyword → entry index
#[derive(Debug, Clone, Default)]
pub struct LoreRegistry {
    entries: Vec<LoreEntry>,
    keywords: BTreeMap<String, usize>,
}

impl LoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` catalog in a directory. Broken files are
    /// skipped with a warning; a missing directory yields an empty registry.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            info!(path = %dir.display(), "No lore catalog directory");
            return Ok(registry);
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "toml").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            match fs::read_to_string(&path)
                .map_err(crate::errors::RetrievalError::from)
                .and_then(|s| Self::parse_catalog(&s))
            {
                Ok(catalog) => {
                    let count = catalog.entries.len();
                    registry.add_catalog(catalog);
                    info!(path = %path.display(), entries = count, "Loaded lore catalog");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load lore catalog");
                }
            }
        }

        info!(keywords = registry.keyword_count(), "Lore registry ready");
        Ok(registry)
    }

    /// Parse one catalog
    pub fn parse_catalog(contents: &str) -> Result<LoreCatalog> {
        Ok(toml::from_str(contents)?)
    }

    /// Registry from a single catalog string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.add_catalog(Self::parse_catalog(contents)?);
        Ok(registry)
    }

    /// Register a catalog; later names override earlier ones
    pub fn add_catalog(&mut self, catalog: LoreCatalog) {
        for mut entry in catalog.entries {
            if entry.domain.is_none() && !catalog.domain.is_empty() {
                entry.domain = Some(catalog.domain.clone());
            }

            let idx = self.entries.len();
            let mut registered = false;
            for name in &entry.names {
                let key = name.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                self.keywords.insert(key, idx);
                registered = true;
            }
            if registered {
                self.entries.push(entry);
            }
        }
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Look up entries by extracted entity names
    pub fn find_by_entities(&self, entities: &[String]) -> Vec<&LoreEntry> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entity in entities {
            let key = entity.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if let Some(&idx) = self.keywords.get(&key) {
                if seen.insert(idx) {
                    out.push(&self.entries[idx]);
                    if out.len() >= MAX_LORE_MATCHES {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Match directly against raw text: exact tokens first, then substrings
    /// for multi-word names when no token matched
    pub fn find_in_text(&self, text: &str) -> Vec<&LoreEntry> {
        let lower = text.to_lowercase();
        if lower.trim().is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            if let Some(&idx) = self.keywords.get(token) {
                if seen.insert(idx) {
                    out.push(&self.entries[idx]);
                    if out.len() >= MAX_LORE_MATCHES {
                        return out;
                    }
                }
            }
        }

        if out.is_empty() {
            for (key, &idx) in &self.keywords {
                if key.chars().count() < MIN_SUBSTRING_KEY || !lower.contains(key.as_str()) {
                    continue;
                }
                if seen.insert(idx) {
                    out.push(&self.entries[idx]);
                    if out.len() >= MAX_LORE_MATCHES {
                        break;
                    }
                }
            }
        }

        out
    }
}
