//! Retrieved hit: a merged candidate with per-source scores.

use std::sync::Arc;

use super::chunk::Chunk;

/// Which retrieval legs produced a hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceFlags {
    /// Produced by dense (semantic) retrieval.
    pub dense: bool,
    /// Produced by sparse (BM25) retrieval.
    pub sparse: bool,
    /// Produced by an exact CPT or alias lookup.
    pub exact: bool,
}

impl SourceFlags {
    /// Unions the flags of two sightings of the same chunk.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            dense: self.dense || other.dense,
            sparse: self.sparse || other.sparse,
            exact: self.exact || other.exact,
        }
    }
}

/// A retrieval candidate after merging across legs.
///
/// Raw scores are kept per source (maximum across sightings) so the
/// hierarchy-aware scorer and the response assembly can both inspect them.
#[derive(Debug, Clone)]
pub struct RetrievedHit {
    /// The full chunk payload.
    pub chunk: Arc<Chunk>,
    /// Raw dense score in [0,1], if the dense leg saw this chunk.
    pub dense_score: Option<f64>,
    /// Normalized sparse score in [0,1], if the sparse leg saw this chunk.
    pub sparse_score: Option<f64>,
    /// Which legs produced this hit.
    pub sources: SourceFlags,
    /// Whether an exact CPT token in the query matched this chunk.
    pub exact_cpt: bool,
    /// Hierarchy-aware final score; [0,2] after bonuses.
    pub final_score: f64,
    /// Cross-encoder score in [0,1] when the reranker ran.
    pub reranker_score: Option<f64>,
}

impl RetrievedHit {
    /// The chunk id this hit joins on.
    #[must_use]
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }

    /// The semantic component: maximum of the dense and sparse scores.
    #[must_use]
    pub fn semantic_score(&self) -> f64 {
        self.dense_score
            .unwrap_or(0.0)
            .max(self.sparse_score.unwrap_or(0.0))
    }
}
