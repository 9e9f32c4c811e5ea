//! Derived, immutable indexes over the chunk corpus.
//!
//! All three are built synchronously at startup and never mutated within a
//! server lifetime: the payload store, the exact-match term index, and the
//! in-memory BM25 index.

mod bm25;
mod corpus;
mod term;

pub use bm25::{Bm25Index, Bm25Params};
pub use corpus::ChunkStore;
pub use term::{TermIndex, TermIndexPayload};
