//! Citation resolution and the visibility policy.
//!
//! The draft cites chunks inline with `[chunk:<id>]` markers. The resolver
//! maps cited chunks to bibliographic records via the pre-built
//! `doc_id -> citation` index, numbers visible references in order of
//! first appearance, and deduplicates by document. Textbook chapters stay
//! hidden from the visible reference list by default while still grounding
//! the answer.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::warn;

use crate::core::{Chunk, Citation, CitationRecord, DocType};
use crate::error::{CorpusError, Result};

static CITE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\[chunk:([A-Za-z0-9_\-]+)\]").unwrap()
});

/// Document types that appear in the visible reference list by default.
#[must_use]
pub fn default_visible_doctypes() -> BTreeSet<DocType> {
    BTreeSet::from([
        DocType::JournalArticle,
        DocType::Guideline,
        DocType::SystematicReview,
    ])
}

/// Pre-built `doc_id -> citation record` index.
#[derive(Debug, Default)]
pub struct CitationIndex {
    records: HashMap<String, CitationRecord>,
}

impl CitationIndex {
    /// Parses the ingestion citation index payload (a JSON object keyed by
    /// `doc_id`).
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::MalformedCitationIndex`] on parse failure.
    pub fn from_json(payload: &str) -> Result<Self> {
        let records: HashMap<String, CitationRecord> =
            serde_json::from_str(payload).map_err(CorpusError::from)?;
        Ok(Self { records })
    }

    /// Looks up the record for a document.
    #[must_use]
    pub fn get(&self, doc_id: &str) -> Option<&CitationRecord> {
        self.records.get(doc_id)
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Extracts cited chunk ids from a draft, in order of first appearance.
#[must_use]
pub fn extract_citation_markers(draft: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for cap in CITE_MARKER_RE.captures_iter(draft) {
        if let Some(id) = cap.get(1) {
            let id = id.as_str().to_string();
            if seen.insert(id.clone()) {
                ordered.push(id);
            }
        }
    }
    ordered
}

/// Citation resolver with the visibility policy.
pub struct CitationResolver {
    index: Arc<CitationIndex>,
    visible_doctypes: BTreeSet<DocType>,
}

impl CitationResolver {
    /// Creates a resolver with an explicit visibility policy.
    #[must_use]
    pub const fn new(index: Arc<CitationIndex>, visible_doctypes: BTreeSet<DocType>) -> Self {
        Self {
            index,
            visible_doctypes,
        }
    }

    /// Resolves the chunks a draft cited, falling back to the full
    /// grounding set when the draft carries no markers.
    ///
    /// One citation per document: multiple cited chunks of the same
    /// document collapse into the first. Visible references are numbered
    /// in order of first appearance; hidden ones carry no number.
    #[must_use]
    pub fn resolve(&self, draft: &str, grounding: &[Arc<Chunk>]) -> Vec<Citation> {
        let cited_ids = extract_citation_markers(draft);
        let by_id: HashMap<&str, &Arc<Chunk>> = grounding
            .iter()
            .map(|chunk| (chunk.chunk_id.as_str(), chunk))
            .collect();

        let cited_chunks: Vec<&Arc<Chunk>> = if cited_ids.is_empty() {
            grounding.iter().collect()
        } else {
            cited_ids
                .iter()
                .filter_map(|id| {
                    let found = by_id.get(id.as_str());
                    if found.is_none() {
                        warn!(chunk_id = %id, "draft cited a chunk outside the grounding set");
                    }
                    found.copied()
                })
                .collect()
        };

        let mut citations: Vec<Citation> = Vec::new();
        let mut seen_docs: HashSet<String> = HashSet::new();
        let mut next_number = 1usize;

        for chunk in cited_chunks {
            if !seen_docs.insert(chunk.doc_id.clone()) {
                continue;
            }
            let Some(record) = self.index.get(&chunk.doc_id) else {
                warn!(doc_id = %chunk.doc_id, "no citation record for document");
                continue;
            };
            let visible = self.visible_doctypes.contains(&record.doc_type);
            let number = if visible {
                let n = next_number;
                next_number += 1;
                Some(n)
            } else {
                None
            };
            citations.push(Citation {
                number,
                chunk_id: chunk.chunk_id.clone(),
                doc_id: chunk.doc_id.clone(),
                authors: record.formatted_authors(),
                year: record.year,
                title: record.title.clone(),
                venue: record.venue.clone(),
                visible,
            });
        }

        citations
    }
}
