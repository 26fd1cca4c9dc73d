//! Table-driven alias correction

use super::AliasCorrector;
use crate::errors::Result;
use crate::types::QueryHints;
use async_trait::async_trait;
use std::collections::HashMap;

/// Replaces whole tokens that match a known alias, case-insensitively.
///
/// Surrounding punctuation and the original whitespace are preserved.
#[derive(Debug, Clone, Default)]
pub struct StaticAliasCorrector {
    table: HashMap<String, String>,
}

impl StaticAliasCorrector {
    pub fn new(aliases: &HashMap<String, String>) -> Self {
        let table = aliases
            .iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Synchronous rewrite
    pub fn rewrite(&self, text: &str) -> String {
        if self.table.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        for piece in text.split_inclusive(char::is_whitespace) {
            let word = piece.trim_end_matches(char::is_whitespace);
            let trailing = &piece[word.len()..];

            let start = word
                .find(|c: char| c.is_alphanumeric())
                .unwrap_or(word.len());
            let end = word
                .rfind(|c: char| c.is_alphanumeric())
                .map(|i| i + word[i..].chars().next().map(char::len_utf8).unwrap_or(1))
                .unwrap_or(start);

            if start < end {
                let core = &word[start..end];
                if let Some(canonical) = self.table.get(&core.to_lowercase()) {
                    out.push_str(&word[..start]);
                    out.push_str(canonical);
                    out.push_str(&word[end..]);
                    out.push_str(trailing);
                    continue;
                }
            }
            out.push_str(piece);
        }
        out
    }
}

#[async_trait]
impl AliasCorrector for StaticAliasCorrector {
    async fn correct(&self, text: &str, _locale: Option<&str>, _hints: &QueryHints) -> Result<String> {
        Ok(self.rewrite(text))
    }
}
