//! Collaborator contracts
//!
//! Everything the orchestrator calls out to goes through one of these
//! narrow traits. Concrete in-process implementations live next to them;
//! network-backed ones belong to the embedding application.

pub mod alias;
pub mod lore;
pub mod memory;

pub use alias::StaticAliasCorrector;
pub use lore::{LoreCatalog, LoreEntry, LoreRegistry};
pub use memory::SessionMemory;

use crate::errors::Result;
use crate::types::{Query, QueryHints, ScoredDocument};
use async_trait::async_trait;

/// A retrieval backend: web search, vector index, knowledge graph, recall
/// set, self-ask, analyze, adaptive web or repair search
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Name used for cooldown bookkeeping and logs
    fn name(&self) -> &str;

    /// Ordered, scored results for the query
    async fn retrieve(&self, query: &Query) -> Result<Vec<ScoredDocument>>;
}

/// Short-term conversational memory
#[async_trait]
pub trait MemoryReader: Send + Sync {
    /// Recent memory for a session, `None` when there is nothing to add
    async fn load_recent(&self, session_id: &str) -> Result<Option<String>>;
}

/// Entity/alias normalization of the raw query text
#[async_trait]
pub trait AliasCorrector: Send + Sync {
    async fn correct(&self, text: &str, locale: Option<&str>, hints: &QueryHints) -> Result<String>;
}

/// Named-entity extraction, usually LLM backed
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<String>>;
}

/// Risk score (0..=100) of a candidate evidence set
pub trait RiskScorer: Send + Sync {
    fn compute_risk(&self, docs: &[ScoredDocument]) -> Result<u8>;
}
