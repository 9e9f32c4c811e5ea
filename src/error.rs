//! Error types for the retrieval and coding engine.
//!
//! This module provides the error hierarchy using `thiserror` for corpus
//! loading, retrieval, synthesis, and procedural coding. Component-level
//! failures that the orchestrator converts into response warnings (degraded
//! retrieval, LLM timeouts, low-confidence coding) are modeled here as
//! variants so call sites can match on them at the boundary.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Corpus loading and validation errors.
    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),

    /// Retrieval errors (dense, sparse, exact legs and their fusion).
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Language-model synthesis errors.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Procedural coding errors.
    #[error("coding error: {0}")]
    Coding(#[from] CodingError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Malformed caller request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What the caller got wrong.
        message: String,
    },
}

/// Corpus loading and validation errors.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// Duplicate chunk identifier in the ingestion stream.
    #[error("duplicate chunk id: {chunk_id}")]
    DuplicateChunkId {
        /// The offending chunk id.
        chunk_id: String,
    },

    /// A record in the NDJSON stream failed to parse.
    #[error("malformed chunk record at line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number in the stream.
        line: usize,
        /// Parser error message.
        reason: String,
    },

    /// The citation index payload failed to parse.
    #[error("malformed citation index: {0}")]
    MalformedCitationIndex(String),

    /// A chunk referenced an unknown document.
    #[error("chunk {chunk_id} references unknown doc {doc_id}")]
    UnknownDocument {
        /// Chunk id carrying the dangling reference.
        chunk_id: String,
        /// Document id not present in the citation index.
        doc_id: String,
    },
}

/// Retrieval-specific errors.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Both the dense and sparse legs are unavailable. Exact-only mode is
    /// never sufficient to answer, so this surfaces as a hard failure.
    #[error("retrieval unavailable: dense and sparse indexes are both down")]
    Unavailable,

    /// No chunks passed the active filters.
    #[error("no chunks match the query filters")]
    EmptyCorpusForQuery,

    /// Requested result count is out of range.
    #[error("top_k {k} out of range (1..=50)")]
    InvalidTopK {
        /// Requested result count.
        k: usize,
    },

    /// The text encoder failed.
    #[error("encoder failure: {0}")]
    Encoder(String),

    /// The external vector store returned an error.
    #[error("vector store failure: {0}")]
    VectorStore(String),

    /// The cross-encoder reranker failed.
    #[error("reranker failure: {0}")]
    Reranker(String),
}

/// Language-model synthesis errors.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The model endpoint is unreachable.
    #[error("llm unavailable: {0}")]
    Unavailable(String),

    /// Synthesis exceeded the request budget.
    #[error("llm timed out after {elapsed_ms} ms")]
    Timeout {
        /// Elapsed milliseconds before the timeout fired.
        elapsed_ms: u64,
    },

    /// The model returned an unusable payload.
    #[error("malformed llm response: {0}")]
    MalformedResponse(String),
}

/// Procedural-coding errors.
#[derive(Error, Debug)]
pub enum CodingError {
    /// The knowledge base file could not be read.
    #[error("coding KB not found: {path}")]
    KbNotFound {
        /// Path to the missing KB file.
        path: String,
    },

    /// The knowledge base JSON failed to parse.
    #[error("malformed coding KB: {0}")]
    KbParse(String),

    /// The KB is missing a section the rule engine requires.
    #[error("coding KB missing section: {section}")]
    KbMissingSection {
        /// Name of the absent section.
        section: String,
    },
}

/// I/O-specific errors for file operations.
#[derive(Error, Debug)]
pub enum IoError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found.
        path: String,
    },

    /// Failed to read file.
    #[error("failed to read file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Memory mapping error.
    #[error("memory mapping failed: {path}: {reason}")]
    MmapFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Generic(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::Generic(err.to_string()))
    }
}

impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedCitationIndex(err.to_string())
    }
}

impl From<serde_json::Error> for CodingError {
    fn from(err: serde_json::Error) -> Self {
        Self::KbParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config {
            message: "bad half-life".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad half-life");
    }

    #[test]
    fn test_retrieval_unavailable_display() {
        let err = RetrievalError::Unavailable;
        assert!(err.to_string().contains("dense and sparse"));
    }

    #[test]
    fn test_corpus_error_variants() {
        let err = CorpusError::DuplicateChunkId {
            chunk_id: "papoip_c012".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate chunk id: papoip_c012");

        let err = CorpusError::MalformedRecord {
            line: 7,
            reason: "missing field `year`".to_string(),
        };
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_llm_timeout_display() {
        let err = LlmError::Timeout { elapsed_ms: 5000 };
        assert_eq!(err.to_string(), "llm timed out after 5000 ms");
    }

    #[test]
    fn test_coding_error_display() {
        let err = CodingError::KbMissingSection {
            section: "ncci_bundles".to_string(),
        };
        assert!(err.to_string().contains("ncci_bundles"));
    }

    #[test]
    fn test_error_from_retrieval() {
        let err: Error = RetrievalError::InvalidTopK { k: 99 }.into();
        assert!(matches!(
            err,
            Error::Retrieval(RetrievalError::InvalidTopK { k: 99 })
        ));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_serde_json_to_coding_error() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: CodingError = json_err.into();
        assert!(matches!(err, CodingError::KbParse(_)));
    }
}
