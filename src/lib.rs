//! # IP-ASSIST-RS
//!
//! Domain-specialized retrieval and answer-synthesis engine for
//! interventional pulmonology. Given a free-text clinical question, it
//! returns a synthesized, cited answer from an authoritative corpus, with
//! hard safety gates for contraindications, pediatric dosing, and
//! emergencies — plus a deterministic procedural coder that maps operative
//! notes to CPT / HCPCS / ICD-10-PCS suggestions.
//!
//! ## Architecture
//!
//! - **Hybrid retrieval**: dense (trait-seamed KNN store), sparse
//!   (in-memory BM25), and exact (CPT / alias term index) legs fused under
//!   a hierarchy-aware score
//! - **Precedence model**: authority tiers, evidence levels, domain-aware
//!   recency half-lives, the A1 floor, and the standard-of-care guard
//! - **Orchestration**: classify → filter → retrieve → rerank → safety
//!   pre-check → synthesize → safety post-check, with an emergency fast
//!   path that skips reranking and synthesis
//! - **Procedural coder**: pattern-based extraction and a KB-driven rule
//!   engine with suppression, NCCI, and modifier handling

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped corpus loading (memmap2)
#![warn(unsafe_code)]

pub mod citation;
pub mod coder;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod orchestrator;
pub mod safety;
pub mod search;
pub mod text;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{
    AuthorityTier, Chunk, ChunkTag, Citation, CitationRecord, DocType, Domain, EvidenceLevel,
    QueryClass, QueryContext, RetrievedHit, SearchFilters, SectionKind, SourceFlags,
};

// Re-export configuration
pub use config::{Config, ConfigBuilder};

// Re-export index types
pub use index::{Bm25Index, Bm25Params, ChunkStore, TermIndex, TermIndexPayload};

// Re-export retrieval types
pub use search::{
    CrossEncoder, DenseClient, HybridRetriever, InMemoryVectorStore, PrecedenceModel,
    SearchOutcome, SearchRequest, TokenOverlapReranker, VectorStore,
};

// Re-export the orchestration surface
pub use orchestrator::{AnswerBundle, AnswerRequest, Orchestrator};

// Re-export the coding surface
pub use coder::{CodeBundle, CodingKb, CodingRequest, PatientContext, ProceduralCoder};
