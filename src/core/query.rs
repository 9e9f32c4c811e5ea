//! Query-side domain types: classification, filters, and request context.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::chunk::{AuthorityTier, Chunk, ChunkTag, Domain, SectionKind};

/// Classification label for a query.
///
/// Discriminants encode the ambiguity precedence (`Emergency = 0` wins over
/// everything); the derived [`Ord`] sorts the strongest label first, which
/// the classifier uses when several regex families fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClass {
    /// Emergency query, routed to the fast path.
    Emergency = 0,
    /// Safety query (contraindications, dosing).
    Safety = 1,
    /// Billing and coding query.
    Coding = 2,
    /// Procedural technique query.
    Procedure = 3,
    /// General clinical query.
    Clinical = 4,
}

impl QueryClass {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Safety => "safety",
            Self::Coding => "coding",
            Self::Procedure => "procedure",
            Self::Clinical => "clinical",
        }
    }

    /// Section kinds considered a strong match for this query class.
    ///
    /// Drives the `section` component of the hierarchy-aware score.
    #[must_use]
    pub fn section_affinity(self, kind: SectionKind) -> bool {
        match self {
            Self::Emergency => matches!(
                kind,
                SectionKind::Procedure | SectionKind::Complications | SectionKind::General
            ),
            Self::Safety => matches!(
                kind,
                SectionKind::Contraindications | SectionKind::Complications
            ),
            Self::Coding => matches!(kind, SectionKind::Coding | SectionKind::TableRow),
            Self::Procedure => matches!(kind, SectionKind::Procedure),
            Self::Clinical => matches!(kind, SectionKind::General | SectionKind::Procedure),
        }
    }
}

impl std::fmt::Display for QueryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-filters applied to merged retrieval candidates.
///
/// Every field is optional; an empty filter set passes all chunks.
/// Tightening any field can only shrink the passing set, which the
/// filter-monotonicity property test exercises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to these authority tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_tiers: Option<BTreeSet<AuthorityTier>>,

    /// Minimum publication year, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_min: Option<i32>,

    /// Maximum publication year, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_max: Option<i32>,

    /// Restrict to a single content domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,

    /// Restrict to these section kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_kinds: Option<BTreeSet<SectionKind>>,

    /// Require the `has_table` tag.
    #[serde(default)]
    pub require_table: bool,

    /// Require the `has_contraindication` tag.
    #[serde(default)]
    pub require_contraindication: bool,

    /// Require safety evidence: `has_contraindication` or `has_dose`.
    #[serde(default)]
    pub require_safety_evidence: bool,
}

impl SearchFilters {
    /// Returns `true` when the chunk passes every active filter.
    #[must_use]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(tiers) = &self.authority_tiers
            && !tiers.contains(&chunk.authority_tier)
        {
            return false;
        }
        if let Some(min) = self.year_min
            && chunk.year < min
        {
            return false;
        }
        if let Some(max) = self.year_max
            && chunk.year > max
        {
            return false;
        }
        if let Some(domain) = self.domain
            && chunk.domain != domain
        {
            return false;
        }
        if let Some(kinds) = &self.section_kinds
            && !kinds.contains(&chunk.section_kind)
        {
            return false;
        }
        if self.require_table && !chunk.has_tag(ChunkTag::HasTable) {
            return false;
        }
        if self.require_contraindication && !chunk.has_tag(ChunkTag::HasContraindication) {
            return false;
        }
        if self.require_safety_evidence
            && !chunk.has_tag(ChunkTag::HasContraindication)
            && !chunk.has_tag(ChunkTag::HasDose)
        {
            return false;
        }
        true
    }

    /// Returns `true` when no filter is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One completed conversation turn in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// The user's query for the turn.
    pub user: String,
    /// The synthesized answer for the turn.
    pub assistant: String,
}

/// Per-request context threaded through the orchestrator stages.
///
/// Owned by the single request; nothing here is shared across requests.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// The query exactly as the caller sent it.
    pub raw_text: String,
    /// Normalized query used for retrieval.
    pub normalized_text: String,
    /// Classification produced by the classify stage.
    pub classification: QueryClass,
    /// Post-filters chosen by the set-filters stage.
    pub filters: SearchFilters,
    /// Desired result count.
    pub top_k: usize,
    /// Whether the cross-encoder reranker runs.
    pub use_reranker: bool,
    /// Session this request belongs to, if any.
    pub session_id: Option<String>,
    /// Prior turns of the session. Only the current turn's normalized
    /// query feeds retrieval.
    pub conversation_history: Vec<HistoryTurn>,
}
