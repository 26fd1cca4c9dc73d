//! Type definitions module
//!
//! Core types shared by every retrieval stage.

pub mod document;
pub mod evidence;
pub mod query;

// Re-export commonly used types
pub use document::{normalize_text, ScoredDocument, SourceTag};
pub use evidence::EvidenceAccumulator;
pub use query::{Query, QueryHints};
