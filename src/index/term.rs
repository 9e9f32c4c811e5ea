//! Exact-match term index: CPT codes and canonical aliases.
//!
//! Built once from the chunk corpus (or loaded from the ingestion payload)
//! and read-only at query time. Exact hits bypass ranking models entirely;
//! the retriever gives them a raw score of 1.0.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::corpus::ChunkStore;

/// Serialized term-index payload delivered by the ingestion collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermIndexPayload {
    /// CPT code to chunk ids.
    #[serde(default)]
    pub cpt: BTreeMap<String, BTreeSet<String>>,
    /// Canonical alias to chunk ids.
    #[serde(default)]
    pub aliases: BTreeMap<String, BTreeSet<String>>,
}

/// Static exact-match index.
#[derive(Debug, Default)]
pub struct TermIndex {
    cpt: BTreeMap<String, BTreeSet<String>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl TermIndex {
    /// Builds the index from the chunk store.
    #[must_use]
    pub fn build(store: &ChunkStore) -> Self {
        let chunks: Vec<_> = store.iter().collect();

        let (cpt, aliases) = chunks
            .par_iter()
            .map(|chunk| {
                let mut cpt: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                let mut aliases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for code in &chunk.cpt_codes {
                    cpt.entry(code.clone())
                        .or_default()
                        .insert(chunk.chunk_id.clone());
                }
                for alias in &chunk.aliases {
                    aliases
                        .entry(alias.to_lowercase())
                        .or_default()
                        .insert(chunk.chunk_id.clone());
                }
                (cpt, aliases)
            })
            .reduce(
                || (BTreeMap::new(), BTreeMap::new()),
                |(mut cpt_a, mut alias_a), (cpt_b, alias_b)| {
                    for (k, v) in cpt_b {
                        cpt_a.entry(k).or_default().extend(v);
                    }
                    for (k, v) in alias_b {
                        alias_a.entry(k).or_default().extend(v);
                    }
                    (cpt_a, alias_a)
                },
            );

        Self { cpt, aliases }
    }

    /// Constructs the index from an ingestion payload.
    #[must_use]
    pub fn from_payload(payload: TermIndexPayload) -> Self {
        Self {
            cpt: payload.cpt,
            aliases: payload
                .aliases
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    /// Chunks mentioning a CPT code.
    #[must_use]
    pub fn chunks_for_cpt(&self, code: &str) -> Option<&BTreeSet<String>> {
        self.cpt.get(code)
    }

    /// Chunks canonical for an alias (case-insensitive).
    #[must_use]
    pub fn chunks_for_alias(&self, alias: &str) -> Option<&BTreeSet<String>> {
        self.aliases.get(&alias.to_lowercase())
    }

    /// All indexed aliases, for scanning a query for known terms.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Number of indexed CPT codes.
    #[must_use]
    pub fn cpt_count(&self) -> usize {
        self.cpt.len()
    }
}
