//! Cross-encoder reranking.
//!
//! A cross-encoder scores (query, document) pairs jointly, slower but more
//! precise than the dual encoders. The production model sits behind
//! [`CrossEncoder`]; the [`TokenOverlapReranker`] is the deterministic
//! compiled-in stand-in. Reranking is skipped entirely on the emergency
//! fast path.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::core::RetrievedHit;
use crate::error::{Result, RetrievalError};

use super::compare_hits;

/// How many top candidates the reranker rescores.
pub const DEFAULT_RERANK_DEPTH: usize = 30;

/// Default inference batch size.
pub const DEFAULT_RERANK_BATCH: usize = 16;

/// Blend weight of the first-stage score; the reranker gets the remainder.
const BLEND_FIRST_STAGE: f64 = 0.5;

/// A query-document scoring model.
///
/// Implementations must be deterministic for a fixed batch.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scores each text against the query, returning values in [0,1] in
    /// input order.
    ///
    /// # Errors
    ///
    /// Returns an error on inference failure.
    async fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f64>>;
}

/// Rescores the top candidates and blends the scores in place.
///
/// Takes the top `depth` hits, scores them in batches of `batch_size`,
/// sets `reranker_score`, blends `final_score` as
/// `0.5 * final + 0.5 * reranker`, and re-sorts the full list.
///
/// # Errors
///
/// Returns [`RetrievalError::Reranker`] if inference fails; callers
/// degrade to the first-stage ordering.
pub async fn rerank(
    query: &str,
    hits: &mut [RetrievedHit],
    encoder: &dyn CrossEncoder,
    depth: usize,
    batch_size: usize,
) -> Result<()> {
    let depth = depth.min(hits.len());
    if depth == 0 {
        return Ok(());
    }
    let batch_size = batch_size.max(1);

    let mut scores: Vec<f64> = Vec::with_capacity(depth);
    for batch in hits[..depth].chunks(batch_size) {
        let texts: Vec<&str> = batch.iter().map(|h| h.chunk.text.as_str()).collect();
        let batch_scores = encoder
            .score_batch(query, &texts)
            .await
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        if batch_scores.len() != texts.len() {
            return Err(RetrievalError::Reranker(format!(
                "batch returned {} scores for {} texts",
                batch_scores.len(),
                texts.len()
            ))
            .into());
        }
        scores.extend(batch_scores);
    }

    for (hit, score) in hits[..depth].iter_mut().zip(scores) {
        let score = score.clamp(0.0, 1.0);
        hit.reranker_score = Some(score);
        hit.final_score =
            BLEND_FIRST_STAGE * hit.final_score + (1.0 - BLEND_FIRST_STAGE) * score;
    }

    hits.sort_by(compare_hits);
    Ok(())
}

/// Deterministic lexical-overlap reranker.
///
/// Scores by Jaccard overlap of lowercase token sets. Not a semantic
/// model; it exists so the full pipeline runs and tests stay hermetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenOverlapReranker;

impl TokenOverlapReranker {
    fn token_set(text: &str) -> HashSet<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    }
}

#[async_trait]
impl CrossEncoder for TokenOverlapReranker {
    async fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f64>> {
        let query_tokens = Self::token_set(query);
        Ok(texts
            .iter()
            .map(|text| {
                let doc_tokens = Self::token_set(text);
                let intersection = query_tokens.intersection(&doc_tokens).count();
                let union = query_tokens.union(&doc_tokens).count();
                if union == 0 {
                    0.0
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    {
                        intersection as f64 / union as f64
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AuthorityTier, Chunk, DocType, Domain, EvidenceLevel, SectionKind, SourceFlags,
    };
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn hit(id: &str, text: &str, score: f64) -> RetrievedHit {
        RetrievedHit {
            chunk: Arc::new(Chunk {
                chunk_id: id.to_string(),
                text: text.to_string(),
                doc_id: "d".to_string(),
                doc_type: DocType::BookChapter,
                section_title: "s".to_string(),
                section_kind: SectionKind::General,
                year: 2024,
                authority_tier: AuthorityTier::A2,
                evidence_level: EvidenceLevel::H3,
                domain: Domain::Clinical,
                cpt_codes: BTreeSet::new(),
                aliases: BTreeSet::new(),
                tags: BTreeSet::new(),
            }),
            dense_score: None,
            sparse_score: None,
            sources: SourceFlags::default(),
            exact_cpt: false,
            final_score: score,
            reranker_score: None,
        }
    }

    #[tokio::test]
    async fn test_rerank_promotes_overlapping_text() {
        let mut hits = vec![
            hit("c1", "pleural effusion drainage", 0.6),
            hit("c2", "tracheal stent placement technique", 0.55),
        ];
        rerank(
            "tracheal stent placement",
            &mut hits,
            &TokenOverlapReranker,
            DEFAULT_RERANK_DEPTH,
            DEFAULT_RERANK_BATCH,
        )
        .await
        .unwrap();

        assert_eq!(hits[0].chunk_id(), "c2");
        assert!(hits[0].reranker_score.is_some());
    }

    #[tokio::test]
    async fn test_rerank_depth_limits_scoring() {
        let mut hits = vec![
            hit("c1", "tracheal stent", 0.9),
            hit("c2", "tracheal stent", 0.8),
        ];
        rerank("tracheal stent", &mut hits, &TokenOverlapReranker, 1, 8)
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.reranker_score.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_empty_is_noop() {
        let mut hits: Vec<RetrievedHit> = Vec::new();
        rerank("q", &mut hits, &TokenOverlapReranker, 30, 16)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_deterministic() {
        let build = || {
            vec![
                hit("c1", "airway dilation balloon", 0.5),
                hit("c2", "airway stent silicone", 0.5),
                hit("c3", "airway laser ablation", 0.5),
            ]
        };
        let mut a = build();
        let mut b = build();
        rerank("airway stent", &mut a, &TokenOverlapReranker, 30, 2)
            .await
            .unwrap();
        rerank("airway stent", &mut b, &TokenOverlapReranker, 30, 2)
            .await
            .unwrap();
        let ids_a: Vec<&str> = a.iter().map(RetrievedHit::chunk_id).collect();
        let ids_b: Vec<&str> = b.iter().map(RetrievedHit::chunk_id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
