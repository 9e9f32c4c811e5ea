//! Chunk payload store and NDJSON corpus loading.
//!
//! The ingestion collaborator delivers chunks as newline-delimited JSON.
//! The store is built once at startup, validates the corpus invariants,
//! and is read-only for the server lifetime.

// Memory mapping requires unsafe but is safe for read-only access
#![allow(unsafe_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::warn;

use crate::core::{Chunk, SectionKind};
use crate::error::{CorpusError, IoError, Result};

/// Threshold for using memory mapping (1MB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Procedure chunks are kept intact and must stay under this token count.
const PROCEDURE_TOKEN_LIMIT: usize = 800;

/// Reads a corpus file, memory-mapping it when large.
fn read_corpus_file(path: &Path) -> Result<String> {
    let path_str = path.to_string_lossy().to_string();

    if !path.exists() {
        return Err(IoError::FileNotFound { path: path_str }.into());
    }

    let file = File::open(path).map_err(|e| IoError::ReadFailed {
        path: path_str.clone(),
        reason: e.to_string(),
    })?;
    let size = file
        .metadata()
        .map_err(|e| IoError::ReadFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?
        .len();

    if size >= MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IoError::MmapFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        String::from_utf8(mmap.to_vec()).map_err(|e| {
            IoError::ReadFailed {
                path: path_str,
                reason: e.to_string(),
            }
            .into()
        })
    } else {
        let mut content = String::with_capacity(usize::try_from(size).unwrap_or(0));
        let mut file = file;
        file.read_to_string(&mut content)
            .map_err(|e| IoError::ReadFailed {
                path: path_str,
                reason: e.to_string(),
            })?;
        Ok(content)
    }
}

/// Immutable chunk payload store keyed by `chunk_id`.
///
/// # Examples
///
/// ```
/// use ip_assist::index::ChunkStore;
///
/// let ndjson = r#"{"chunk_id":"d1_c1","text":"Rigid bronchoscopy overview.","doc_id":"d1","doc_type":"book_chapter","section_title":"Overview","section_kind":"general","year":2024,"authority_tier":"A1","evidence_level":"H3","domain":"clinical"}"#;
/// let store = ChunkStore::from_ndjson(ndjson).unwrap();
/// assert_eq!(store.len(), 1);
/// assert!(store.get("d1_c1").is_some());
/// ```
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: HashMap<String, Arc<Chunk>>,
}

impl ChunkStore {
    /// Parses an NDJSON chunk stream and validates corpus invariants.
    ///
    /// Hard errors: malformed records and duplicate chunk ids. Soft
    /// violations (a declared CPT code missing from the text, an oversized
    /// procedure chunk) are logged and the chunk is kept.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError`] on parse failures or duplicate ids.
    pub fn from_ndjson(stream: &str) -> Result<Self> {
        let mut chunks: HashMap<String, Arc<Chunk>> = HashMap::new();

        for (idx, line) in stream.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let chunk: Chunk =
                serde_json::from_str(line).map_err(|e| CorpusError::MalformedRecord {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;

            validate_chunk(&chunk);

            if chunks.contains_key(&chunk.chunk_id) {
                return Err(CorpusError::DuplicateChunkId {
                    chunk_id: chunk.chunk_id,
                }
                .into());
            }
            chunks.insert(chunk.chunk_id.clone(), Arc::new(chunk));
        }

        Ok(Self { chunks })
    }

    /// Loads an NDJSON corpus file, memory-mapping large files.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a record is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read_corpus_file(path.as_ref())?;
        Self::from_ndjson(&content)
    }

    /// Looks up a chunk by id.
    #[must_use]
    pub fn get(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.chunks.get(chunk_id).cloned()
    }

    /// Returns `true` if the chunk id exists.
    #[must_use]
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunks.contains_key(chunk_id)
    }

    /// Number of chunks in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` when the store holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterates over all chunks.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.values()
    }
}

/// Logs soft invariant violations for a chunk.
fn validate_chunk(chunk: &Chunk) {
    for cpt in &chunk.cpt_codes {
        if !chunk.text.contains(cpt.as_str()) {
            warn!(
                chunk_id = %chunk.chunk_id,
                cpt = %cpt,
                "declared CPT code does not occur in chunk text"
            );
        }
    }
    if chunk.section_kind == SectionKind::Procedure && chunk.token_count() > PROCEDURE_TOKEN_LIMIT {
        warn!(
            chunk_id = %chunk.chunk_id,
            tokens = chunk.token_count(),
            "procedure chunk exceeds token limit"
        );
    }
}
