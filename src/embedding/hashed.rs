//! Hash-based fallback encoder.
//!
//! Deterministic pseudo-embeddings from word and character-trigram
//! hashing. Similarity is lexical overlap, not semantics; the production
//! dual encoder replaces this behind the same trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;

use crate::embedding::TextEncoder;
use crate::error::Result;

/// Prefix mixed into query hashes so query and article encodings differ,
/// mirroring the asymmetric dual-encoder interface.
const QUERY_SALT: &str = "q:";

/// Hash-based fallback encoder.
///
/// # Examples
///
/// ```
/// use ip_assist::embedding::{DEFAULT_DIMENSIONS, HashedEncoder, TextEncoder};
///
/// let encoder = HashedEncoder::new(DEFAULT_DIMENSIONS);
/// let a = encoder.encode_article("balloon dilation").unwrap();
/// let b = encoder.encode_article("balloon dilation").unwrap();
/// assert_eq!(a, b); // deterministic
/// ```
pub struct HashedEncoder {
    dimensions: usize,
}

impl HashedEncoder {
    /// Creates an encoder producing vectors of the given width.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate(&self, text: &str, salt: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing (primary signal)
        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigram hashing (secondary signal for fuzzy overlap)
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let mut trigram = String::with_capacity(salt.len() + 3);
                trigram.push_str(salt);
                trigram.extend(window.iter());
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        // Unit length for cosine similarity
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl TextEncoder for HashedEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text, QUERY_SALT))
    }

    fn encode_article(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text, ""))
    }

    fn encode_articles(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .par_iter()
            .map(|text| self.generate(text, ""))
            .collect())
    }
}
