//! Dense retrieval: the KNN store seam and its in-memory implementation.
//!
//! The production vector store is external; it is consumed behind
//! [`VectorStore`] and must return the `chunk_id` as the hit id. The
//! [`InMemoryVectorStore`] (exhaustive cosine scan) backs tests and
//! single-node deployments.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Chunk;
use crate::embedding::{TextEncoder, cosine_similarity};
use crate::error::{Result, RetrievalError};
use crate::index::ChunkStore;

/// One nearest-neighbor hit from the store.
#[derive(Debug, Clone)]
pub struct KnnHit {
    /// The `chunk_id` of the matched chunk.
    pub id: String,
    /// Similarity score in [0,1].
    pub score: f64,
    /// Full chunk payload when the store carries it.
    pub payload: Option<Arc<Chunk>>,
}

/// Payload-carrying KNN index keyed by chunk id.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns the `k` nearest chunks to the query vector, descending by
    /// score.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    async fn knn_search(&self, vector: &[f32], k: usize) -> Result<Vec<KnnHit>>;
}

/// Exhaustive-scan vector store over the corpus.
pub struct InMemoryVectorStore {
    entries: Vec<(String, Vec<f32>)>,
}

impl InMemoryVectorStore {
    /// Encodes every chunk in the store and builds the index.
    ///
    /// # Errors
    ///
    /// Returns an error if article encoding fails.
    pub fn build(store: &ChunkStore, encoder: &dyn TextEncoder) -> Result<Self> {
        let chunks: Vec<&Arc<Chunk>> = store.iter().collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = encoder.encode_articles(&texts)?;

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| (chunk.chunk_id.clone(), vector))
            .collect();

        Ok(Self { entries })
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn knn_search(&self, vector: &[f32], k: usize) -> Result<Vec<KnnHit>> {
        let mut scored: Vec<KnnHit> = self
            .entries
            .iter()
            .map(|(id, candidate)| KnnHit {
                id: id.clone(),
                score: f64::from(cosine_similarity(vector, candidate)).clamp(0.0, 1.0),
                payload: None,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Couples the query encoder with the KNN store.
pub struct DenseClient {
    encoder: Arc<dyn TextEncoder>,
    store: Arc<dyn VectorStore>,
}

impl DenseClient {
    /// Creates a dense client.
    #[must_use]
    pub fn new(encoder: Arc<dyn TextEncoder>, store: Arc<dyn VectorStore>) -> Self {
        Self { encoder, store }
    }

    /// Encodes the query and returns the top `m` chunk ids with scores in
    /// [0,1], descending.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Encoder`] or
    /// [`RetrievalError::VectorStore`] on leg failures.
    pub async fn top_m(&self, query: &str, m: usize) -> Result<Vec<(String, f64)>> {
        let vector = self
            .encoder
            .encode_query(query)
            .map_err(|e| RetrievalError::Encoder(e.to_string()))?;
        let hits = self
            .store
            .knn_search(&vector, m)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
        Ok(hits
            .into_iter()
            .map(|hit| (hit.id, hit.score.clamp(0.0, 1.0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DEFAULT_DIMENSIONS, HashedEncoder};

    fn store() -> ChunkStore {
        let stream = r#"{"chunk_id":"c1","text":"tracheal stent placement for malignant obstruction","doc_id":"d1","doc_type":"book_chapter","section_title":"Stents","section_kind":"procedure","year":2024,"authority_tier":"A1","evidence_level":"H3","domain":"clinical"}
{"chunk_id":"c2","text":"pleural effusion drainage with tunneled catheter","doc_id":"d1","doc_type":"book_chapter","section_title":"Pleura","section_kind":"procedure","year":2024,"authority_tier":"A1","evidence_level":"H3","domain":"clinical"}
"#;
        ChunkStore::from_ndjson(stream).unwrap()
    }

    #[tokio::test]
    async fn test_knn_orders_by_similarity() {
        let encoder = HashedEncoder::new(DEFAULT_DIMENSIONS);
        let index = InMemoryVectorStore::build(&store(), &encoder).unwrap();
        let client = DenseClient::new(Arc::new(encoder), Arc::new(index));

        let hits = client.top_m("tracheal stent placement", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "c1");
        assert!(hits[0].1 >= hits[1].1);
    }

    #[tokio::test]
    async fn test_scores_clamped() {
        let encoder = HashedEncoder::new(DEFAULT_DIMENSIONS);
        let index = InMemoryVectorStore::build(&store(), &encoder).unwrap();
        let client = DenseClient::new(Arc::new(encoder), Arc::new(index));

        let hits = client.top_m("unrelated cardiology query", 2).await.unwrap();
        for (_, score) in hits {
            assert!((0.0..=1.0).contains(&score));
        }
    }
}
