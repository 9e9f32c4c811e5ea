//! Text encoding for dense retrieval.
//!
//! The production encoder is a medical-domain dual encoder (separate query
//! and article models) consumed behind the [`TextEncoder`] trait; this
//! crate ships only the deterministic hashed fallback, which keeps the
//! pipeline runnable without model weights and backs the test suite.

mod hashed;

pub use hashed::HashedEncoder;

use crate::error::Result;

/// Embedding dimensions of the medical dual encoder.
///
/// The authoritative constant for every vector surface in the crate; the
/// fallback encoder produces vectors of the same width so stores can be
/// swapped without re-indexing logic.
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Trait for dense text encoders.
///
/// Implementations must be deterministic and thread-safe. Queries and
/// articles may be encoded by different underlying models, so the two
/// entry points are distinct even when an implementation shares weights.
pub trait TextEncoder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Encodes a search query.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    fn encode_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Encodes an article chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    fn encode_article(&self, text: &str) -> Result<Vec<f32>>;

    /// Encodes a batch of article chunks.
    ///
    /// The default implementation encodes sequentially; implementations
    /// may override for true batching.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails for any text.
    fn encode_articles(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode_article(t)).collect()
    }
}

/// Computes cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
