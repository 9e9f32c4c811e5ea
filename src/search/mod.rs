//! Hybrid retrieval: dense + sparse + exact legs under one ranking.
//!
//! The three legs run per query (dense and sparse concurrently, exact from
//! the term index), merge by chunk id, and are ordered by the
//! hierarchy-aware score. The precedence model supplies the authority,
//! evidence, and recency component; the optional cross-encoder refines the
//! top of the list.

mod dense;
mod precedence;
mod rerank;

pub use dense::{DenseClient, InMemoryVectorStore, KnnHit, VectorStore};
pub use precedence::{DEFAULT_A1_FLOOR, PrecedenceModel, apply_standard_of_care_guard};
pub use rerank::{
    CrossEncoder, DEFAULT_RERANK_BATCH, DEFAULT_RERANK_DEPTH, TokenOverlapReranker, rerank,
};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::core::{Domain, QueryClass, RetrievedHit, SearchFilters, SourceFlags};
use crate::error::{Result, RetrievalError};
use crate::index::{Bm25Index, ChunkStore, TermIndex};

/// Default number of candidates each leg retrieves.
pub const DEFAULT_TOP_M: usize = 60;

/// Maximum permitted `top_k`.
pub const MAX_TOP_K: usize = 50;

/// Hierarchy-aware score weights. Tuning parameters, not invariants; the
/// configuration layer may override the tuning struct that carries them.
const W_PRECEDENCE: f64 = 0.45;
const W_SEMANTIC: f64 = 0.35;
const W_SECTION: f64 = 0.10;
const W_ENTITY: f64 = 0.10;
const BONUS_EXACT_CPT: f64 = 0.05;
const BONUS_CODING_DOMAIN: f64 = 0.05;
const SECTION_MISMATCH: f64 = 0.5;

static CPT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b\d{5}\b").unwrap()
});

/// Retriever tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalTuning {
    /// Candidates per leg; the effective value is `max(top_m, 3k)`.
    pub top_m: usize,
    /// How many top candidates the reranker rescores.
    pub rerank_depth: usize,
    /// Reranker inference batch size.
    pub rerank_batch: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            top_m: DEFAULT_TOP_M,
            rerank_depth: DEFAULT_RERANK_DEPTH,
            rerank_batch: DEFAULT_RERANK_BATCH,
        }
    }
}

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Normalized query text.
    pub query: &'a str,
    /// Classification of the query, for section affinity and bonuses.
    pub class: QueryClass,
    /// Desired result count, 1..=50.
    pub k: usize,
    /// Post-filters on merged candidates.
    pub filters: &'a SearchFilters,
    /// Whether the cross-encoder refines the top candidates.
    pub use_reranker: bool,
    /// Budget for the dense leg; on expiry the leg is cancelled and the
    /// query degrades to sparse + exact.
    pub dense_timeout: Duration,
}

/// Retrieval result: ordered hits plus degradation warnings.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Hits ordered by descending final score.
    pub hits: Vec<RetrievedHit>,
    /// Degradation and staleness warnings.
    pub warnings: Vec<String>,
    /// True when a leg was unavailable and the answer is degraded.
    pub degraded: bool,
}

/// Total order on hits: score, then authority, recency, brevity, id.
pub(crate) fn compare_hits(a: &RetrievedHit, b: &RetrievedHit) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.authority_tier.cmp(&b.chunk.authority_tier))
        .then_with(|| b.chunk.year.cmp(&a.chunk.year))
        .then_with(|| a.chunk.text.len().cmp(&b.chunk.text.len()))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}

#[derive(Default)]
struct MergedCandidate {
    dense: Option<f64>,
    sparse: Option<f64>,
    flags: SourceFlags,
    exact_cpt: bool,
}

/// The hybrid retriever.
///
/// Holds process-wide read-only resources: the payload store, the term
/// index, and the optional dense/sparse/reranker components.
pub struct HybridRetriever {
    store: Arc<ChunkStore>,
    term: Arc<TermIndex>,
    precedence: PrecedenceModel,
    tuning: RetrievalTuning,
    bm25: Option<Arc<Bm25Index>>,
    dense: Option<DenseClient>,
    reranker: Option<Arc<dyn CrossEncoder>>,
}

impl HybridRetriever {
    /// Creates a retriever with only the exact leg wired. Attach the other
    /// legs with [`with_bm25`](Self::with_bm25),
    /// [`with_dense`](Self::with_dense), and
    /// [`with_reranker`](Self::with_reranker).
    #[must_use]
    pub const fn new(
        store: Arc<ChunkStore>,
        term: Arc<TermIndex>,
        precedence: PrecedenceModel,
        tuning: RetrievalTuning,
    ) -> Self {
        Self {
            store,
            term,
            precedence,
            tuning,
            bm25: None,
            dense: None,
            reranker: None,
        }
    }

    /// Attaches the sparse leg.
    #[must_use]
    pub fn with_bm25(mut self, bm25: Arc<Bm25Index>) -> Self {
        self.bm25 = Some(bm25);
        self
    }

    /// Attaches the dense leg.
    #[must_use]
    pub fn with_dense(mut self, dense: DenseClient) -> Self {
        self.dense = Some(dense);
        self
    }

    /// Attaches the cross-encoder reranker.
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn CrossEncoder>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// The precedence model in use.
    #[must_use]
    pub const fn precedence_model(&self) -> &PrecedenceModel {
        &self.precedence
    }

    /// Runs the hybrid search.
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::InvalidTopK`] for `k` outside 1..=50.
    /// - [`RetrievalError::Unavailable`] when both the dense and sparse
    ///   legs are down; exact-only mode is never sufficient.
    /// - [`RetrievalError::EmptyCorpusForQuery`] when no candidate passes
    ///   the filters.
    pub async fn search(&self, req: SearchRequest<'_>) -> Result<SearchOutcome> {
        if req.k == 0 || req.k > MAX_TOP_K {
            return Err(RetrievalError::InvalidTopK { k: req.k }.into());
        }
        let m = self.tuning.top_m.max(3 * req.k);
        let mut warnings: Vec<String> = Vec::new();
        let mut degraded = false;

        // Dense and sparse legs run concurrently; the dense leg is
        // cancelled at its timeout.
        let dense_leg = async {
            match &self.dense {
                None => Err("dense leg not configured".to_string()),
                Some(client) => {
                    match tokio::time::timeout(req.dense_timeout, client.top_m(req.query, m)).await
                    {
                        Ok(Ok(hits)) => Ok(hits),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!(
                            "dense leg timed out after {} ms",
                            req.dense_timeout.as_millis()
                        )),
                    }
                }
            }
        };
        let sparse_leg = async {
            self.bm25
                .as_ref()
                .map(|index| index.search(req.query, m))
                .ok_or_else(|| "sparse leg not configured".to_string())
        };
        let (dense_result, sparse_result) = tokio::join!(dense_leg, sparse_leg);

        let dense_hits = match dense_result {
            Ok(hits) => Some(hits),
            Err(reason) => {
                warn!(%reason, "dense retrieval degraded");
                warnings.push(format!("retrieval degraded: {reason}"));
                degraded = true;
                None
            }
        };
        let sparse_hits = match sparse_result {
            Ok(hits) => Some(hits),
            Err(reason) => {
                warn!(%reason, "sparse retrieval degraded");
                warnings.push(format!("retrieval degraded: {reason}"));
                degraded = true;
                None
            }
        };

        if dense_hits.is_none() && sparse_hits.is_none() {
            return Err(RetrievalError::Unavailable.into());
        }

        let mut merged: HashMap<String, MergedCandidate> = HashMap::new();

        if let Some(hits) = dense_hits {
            for (chunk_id, score) in hits {
                let entry = merged.entry(chunk_id).or_default();
                entry.dense = Some(entry.dense.unwrap_or(0.0).max(score));
                entry.flags.dense = true;
            }
        }

        if let Some(hits) = sparse_hits {
            // Normalize to [0,1] by the query's own top-1 score; with no
            // sparse hits there is nothing to normalize.
            if let Some(&(_, top)) = hits.first()
                && top > 0.0
            {
                for (chunk_id, score) in hits {
                    let entry = merged.entry(chunk_id).or_default();
                    entry.sparse = Some(entry.sparse.unwrap_or(0.0).max(score / top));
                    entry.flags.sparse = true;
                }
            }
        }

        self.merge_exact(req.query, &mut merged);

        let mut hits: Vec<RetrievedHit> = merged
            .into_iter()
            .filter_map(|(chunk_id, cand)| {
                let Some(chunk) = self.store.get(&chunk_id) else {
                    warn!(%chunk_id, "retrieved id missing from payload store");
                    return None;
                };
                let final_score = self.score(req.class, &cand, &chunk);
                Some(RetrievedHit {
                    chunk,
                    dense_score: cand.dense,
                    sparse_score: cand.sparse,
                    sources: cand.flags,
                    exact_cpt: cand.exact_cpt,
                    final_score,
                    reranker_score: None,
                })
            })
            .collect();

        hits.sort_by(compare_hits);
        apply_standard_of_care_guard(&self.precedence, &mut hits);

        hits.retain(|hit| req.filters.matches(&hit.chunk));
        if hits.is_empty() {
            return Err(RetrievalError::EmptyCorpusForQuery.into());
        }

        if req.use_reranker
            && let Some(reranker) = &self.reranker
        {
            if let Err(e) = rerank(
                req.query,
                &mut hits,
                reranker.as_ref(),
                self.tuning.rerank_depth,
                self.tuning.rerank_batch,
            )
            .await
            {
                warn!(error = %e, "reranker failed, keeping first-stage order");
                warnings.push(format!("reranker unavailable: {e}"));
            }
        }

        hits.truncate(req.k);

        for hit in &hits {
            if self.precedence.is_stale_coding(&hit.chunk) {
                warnings.push(format!(
                    "stale_coding: {} ({}) predates the coding half-life",
                    hit.chunk_id(),
                    hit.chunk.year
                ));
            }
        }

        debug!(
            query = req.query,
            k = req.k,
            hits = hits.len(),
            degraded,
            "hybrid search complete"
        );

        Ok(SearchOutcome {
            hits,
            warnings,
            degraded,
        })
    }

    /// Merges exact CPT and alias lookups into the candidate set.
    fn merge_exact(&self, query: &str, merged: &mut HashMap<String, MergedCandidate>) {
        for token in CPT_TOKEN_RE.find_iter(query) {
            if let Some(ids) = self.term.chunks_for_cpt(token.as_str()) {
                for id in ids {
                    let entry = merged.entry(id.clone()).or_default();
                    entry.flags.exact = true;
                    entry.exact_cpt = true;
                }
            }
        }

        let query_lower = query.to_lowercase();
        for alias in self.term.aliases() {
            if query_lower.contains(alias)
                && let Some(ids) = self.term.chunks_for_alias(alias)
            {
                for id in ids {
                    merged.entry(id.clone()).or_default().flags.exact = true;
                }
            }
        }
    }

    /// The hierarchy-aware final score.
    fn score(&self, class: QueryClass, cand: &MergedCandidate, chunk: &crate::core::Chunk) -> f64 {
        let precedence = self.precedence.precedence(chunk);
        let semantic = cand.dense.unwrap_or(0.0).max(cand.sparse.unwrap_or(0.0));
        let section = if class.section_affinity(chunk.section_kind) {
            1.0
        } else {
            SECTION_MISMATCH
        };
        let entity = if cand.flags.exact { 1.0 } else { 0.0 };

        let mut score = W_PRECEDENCE * precedence
            + W_SEMANTIC * semantic
            + W_SECTION * section
            + W_ENTITY * entity;
        if cand.exact_cpt {
            score += BONUS_EXACT_CPT;
        }
        if class == QueryClass::Coding && chunk.domain == Domain::CodingBilling {
            score += BONUS_CODING_DOMAIN;
        }
        score
    }
}
