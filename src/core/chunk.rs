//! Chunk representation, the atomic unit of retrieval.
//!
//! Chunks are produced once by the ingestion collaborator and are immutable
//! for the lifetime of the server. Every index (term, BM25, dense) joins on
//! `chunk_id`, and retrieval carries the full chunk payload back to the
//! orchestrator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Document type of the source a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// Clinical practice guideline.
    Guideline,
    /// Systematic review or meta-analysis.
    SystematicReview,
    /// Randomized controlled trial.
    Rct,
    /// Cohort study.
    Cohort,
    /// Narrative review article.
    NarrativeReview,
    /// Textbook chapter.
    BookChapter,
    /// Case report or series.
    Case,
    /// Standalone journal article not otherwise classified.
    JournalArticle,
}

impl DocType {
    /// Returns the string representation used in payloads and policies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guideline => "guideline",
            Self::SystematicReview => "systematic_review",
            Self::Rct => "rct",
            Self::Cohort => "cohort",
            Self::NarrativeReview => "narrative_review",
            Self::BookChapter => "book_chapter",
            Self::Case => "case",
            Self::JournalArticle => "journal_article",
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Section classification assigned at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Procedure description. Kept intact and at most 800 tokens.
    Procedure,
    /// Complication discussion.
    Complications,
    /// Contraindication discussion.
    Contraindications,
    /// Billing and coding prose.
    Coding,
    /// Thermal and non-thermal ablation content.
    Ablation,
    /// Bronchoscopic lung volume reduction content.
    Blvr,
    /// General prose.
    General,
    /// A single rendered table row (plus one all-rows chunk per table).
    TableRow,
}

impl SectionKind {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Procedure => "procedure",
            Self::Complications => "complications",
            Self::Contraindications => "contraindications",
            Self::Coding => "coding",
            Self::Ablation => "ablation",
            Self::Blvr => "blvr",
            Self::General => "general",
            Self::TableRow => "table_row",
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority tier assigned per document at ingestion.
///
/// Discriminants are inverted (`A1 = 0`, `A4 = 3`) so the derived [`Ord`]
/// sorts the most authoritative tier first; tie-breaking in the retriever
/// relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthorityTier {
    /// Current flagship textbook.
    A1 = 0,
    /// Mature practical textbook.
    A2 = 1,
    /// Older textbook.
    A3 = 2,
    /// Journal article.
    A4 = 3,
}

impl AuthorityTier {
    /// Authority weight used by the precedence model.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::A1 => 1.0,
            Self::A2 => 0.85,
            Self::A3 => 0.7,
            Self::A4 => 0.6,
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
            Self::A4 => "A4",
        }
    }
}

impl std::fmt::Display for AuthorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence level of the underlying study design.
///
/// Same inverted-discriminant scheme as [`AuthorityTier`]: `H1` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EvidenceLevel {
    /// Guideline or systematic review.
    H1 = 0,
    /// Randomized controlled trial.
    H2 = 1,
    /// Cohort study or narrative review.
    H3 = 2,
    /// Case report.
    H4 = 3,
}

impl EvidenceLevel {
    /// Evidence weight used by the precedence model.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::H1 => 1.0,
            Self::H2 => 0.9,
            Self::H3 => 0.75,
            Self::H4 => 0.6,
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
        }
    }
}

impl std::fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content domain, which selects the recency half-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// General clinical content.
    Clinical,
    /// Billing and coding content. Shortest half-life; stale chunks are
    /// flagged for the citation layer.
    CodingBilling,
    /// Thermal and non-thermal ablation.
    Ablation,
    /// Bronchoscopic lung volume reduction.
    LungVolumeReduction,
    /// Navigation platforms and emerging technology.
    TechnologyNavigation,
}

impl Domain {
    /// Default recency half-life in years for this domain.
    #[must_use]
    pub const fn default_half_life_years(self) -> f64 {
        match self {
            Self::CodingBilling => 3.0,
            Self::TechnologyNavigation => 4.0,
            Self::Ablation | Self::LungVolumeReduction => 5.0,
            Self::Clinical => 6.0,
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clinical => "clinical",
            Self::CodingBilling => "coding_billing",
            Self::Ablation => "ablation",
            Self::LungVolumeReduction => "lung_volume_reduction",
            Self::TechnologyNavigation => "technology_navigation",
        }
    }

    /// All domains, for config table construction.
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Clinical,
            Self::CodingBilling,
            Self::Ablation,
            Self::LungVolumeReduction,
            Self::TechnologyNavigation,
        ]
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content tags assigned at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkTag {
    /// Chunk renders tabular content.
    HasTable,
    /// Chunk discusses a contraindication.
    HasContraindication,
    /// Chunk contains an explicit dose.
    HasDose,
    /// Chunk matches an emergency pattern.
    HasEmergencyPattern,
}

/// The atomic unit of retrieval.
///
/// # Examples
///
/// ```
/// use ip_assist::core::{AuthorityTier, Chunk, Domain, SectionKind};
///
/// let chunk: Chunk = serde_json::from_str(
///     r#"{
///         "chunk_id": "papoip_c001",
///         "text": "Fiducial markers: place 3-6 markers, 1.5-5 cm apart, non-collinear.",
///         "doc_id": "papoip",
///         "doc_type": "book_chapter",
///         "section_title": "Fiducial Marker Placement",
///         "section_kind": "procedure",
///         "year": 2025,
///         "authority_tier": "A1",
///         "evidence_level": "H3",
///         "domain": "clinical",
///         "cpt_codes": [],
///         "aliases": ["fiducial marker"],
///         "tags": []
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(chunk.authority_tier, AuthorityTier::A1);
/// assert_eq!(chunk.section_kind, SectionKind::Procedure);
/// assert_eq!(chunk.domain, Domain::Clinical);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable unique identifier, the join key across all indexes.
    pub chunk_id: String,

    /// Normalized prose, or a table row rendered as text.
    pub text: String,

    /// Identifier of the source document.
    pub doc_id: String,

    /// Source document type.
    pub doc_type: DocType,

    /// Title of the section the chunk was cut from.
    pub section_title: String,

    /// Section classification.
    pub section_kind: SectionKind,

    /// Publication year.
    pub year: i32,

    /// Authority tier of the source document.
    pub authority_tier: AuthorityTier,

    /// Evidence level of the source document.
    pub evidence_level: EvidenceLevel,

    /// Content domain.
    pub domain: Domain,

    /// CPT codes mentioned in the chunk text.
    #[serde(default)]
    pub cpt_codes: BTreeSet<String>,

    /// Canonical medical terms this chunk is an authority for.
    #[serde(default)]
    pub aliases: BTreeSet<String>,

    /// Content tags.
    #[serde(default)]
    pub tags: BTreeSet<ChunkTag>,
}

impl Chunk {
    /// Whitespace token count of the chunk text.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Returns `true` if the chunk carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: ChunkTag) -> bool {
        self.tags.contains(&tag)
    }
}
