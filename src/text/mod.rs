//! Text normalization, the medical lexicon, and query preparation.
//!
//! Everything that touches free text before it reaches an index or a
//! pattern battery lives here.

mod lexicon;
mod normalize;
mod query;

pub use lexicon::{
    ABBREVIATIONS, MIN_CHUNK_SUPPORT, MedicalLexicon, edit_distance, expand_abbreviation,
};
pub use normalize::normalize_text;
pub use query::{NormalizedQuery, QueryNormalizer, is_cpt_token};
