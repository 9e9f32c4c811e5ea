//! In-memory BM25 index over chunk text.
//!
//! Whitespace + lowercase tokenization, Robertson-Sparck-Jones IDF with
//! 0.5 smoothing. The index is immutable once built; scores are raw BM25
//! and are normalized to [0,1] by the retriever dividing by the query's
//! top-1 score.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::core::Chunk;

/// BM25 free parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation (typical range 1.2-2.0).
    pub k1: f64,
    /// Length normalization (typical range 0.5-0.9).
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// One posting: document ordinal and term frequency.
type Posting = (u32, u32);

/// In-memory sparse index.
pub struct Bm25Index {
    params: Bm25Params,
    doc_ids: Vec<String>,
    doc_lens: Vec<u32>,
    avgdl: f64,
    postings: HashMap<String, Vec<Posting>>,
}

/// Whitespace + lowercase tokenization.
fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

impl Bm25Index {
    /// Builds the index over the given chunks.
    #[must_use]
    pub fn build(chunks: &[Arc<Chunk>], params: Bm25Params) -> Self {
        // Tokenize in parallel; merge postings on one thread to keep
        // ordinals stable.
        let tokenized: Vec<(String, Vec<String>)> = chunks
            .par_iter()
            .map(|c| (c.chunk_id.clone(), tokenize(&c.text)))
            .collect();

        let mut doc_ids = Vec::with_capacity(tokenized.len());
        let mut doc_lens = Vec::with_capacity(tokenized.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_len: u64 = 0;

        for (ordinal, (chunk_id, tokens)) in tokenized.into_iter().enumerate() {
            let ordinal = u32::try_from(ordinal).unwrap_or(u32::MAX);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            doc_ids.push(chunk_id);
            let len = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
            doc_lens.push(len);
            total_len += u64::from(len);
            for (term, freq) in tf {
                postings.entry(term).or_default().push((ordinal, freq));
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let avgdl = if doc_ids.is_empty() {
            0.0
        } else {
            total_len as f64 / doc_ids.len() as f64
        };

        Self {
            params,
            doc_ids,
            doc_lens,
            avgdl,
            postings,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    /// Returns `true` when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Inverse document frequency with 0.5 smoothing.
    #[allow(clippy::cast_precision_loss)]
    fn idf(&self, term: &str) -> f64 {
        let n = self.doc_ids.len() as f64;
        let df = self.postings.get(term).map_or(0.0, |p| p.len() as f64);
        ((n - df + 0.5) / (df + 0.5)).ln_1p()
    }

    /// Scores the query against the corpus and returns the `top_m` chunk
    /// ids with raw BM25 scores, descending. Deterministic: ties break on
    /// chunk id.
    #[must_use]
    pub fn search(&self, query: &str, top_m: usize) -> Vec<(String, f64)> {
        if self.doc_ids.is_empty() || top_m == 0 {
            return Vec::new();
        }

        let terms = tokenize(query);
        let mut scores: HashMap<u32, f64> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(term);
            for &(ordinal, tf) in postings {
                let doc_len = f64::from(self.doc_lens[ordinal as usize]);
                let tf = f64::from(tf);
                let denom = tf
                    + self.params.k1 * (1.0 - self.params.b + self.params.b * doc_len / self.avgdl);
                let contribution = idf * tf * (self.params.k1 + 1.0) / denom;
                *scores.entry(ordinal).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|&(_, score)| score > 0.0)
            .map(|(ordinal, score)| (self.doc_ids[ordinal as usize].clone(), score))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_m);
        ranked
    }
}
