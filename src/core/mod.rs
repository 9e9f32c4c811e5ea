//! Core domain types.
//!
//! Closed records shared by every layer: chunks and their classification
//! enums, query context and filters, retrieved hits, and citations.
//! Downstream code must not rely on fields beyond these schemas.

mod chunk;
mod citation;
mod hit;
mod query;

pub use chunk::{
    AuthorityTier, Chunk, ChunkTag, DocType, Domain, EvidenceLevel, SectionKind,
};
pub use citation::{Citation, CitationRecord};
pub use hit::{RetrievedHit, SourceFlags};
pub use query::{HistoryTurn, QueryClass, QueryContext, SearchFilters};
