//! The precedence model: authority, evidence, and recency in one score.
//!
//! Precedence combines a domain-aware recency decay with the evidence and
//! authority weights. Two guards sit on top: the A1 floor (flagship
//! textbook content never decays below 0.7 recency) and the
//! standard-of-care guard (a journal article only displaces flagship
//! content with strong, newer evidence).

use std::collections::BTreeMap;

use crate::core::{AuthorityTier, Chunk, Domain, EvidenceLevel, RetrievedHit};

/// Default minimum recency weight for A1 chunks.
pub const DEFAULT_A1_FLOOR: f64 = 0.7;

/// Years of recency advantage an A4 chunk needs to outrank an A1 chunk on
/// the same topic.
const GUARD_RECENCY_ADVANTAGE: i32 = 3;

/// Weight of the recency component in the precedence score.
const RECENCY_WEIGHT: f64 = 0.5;
/// Weight of the evidence-level component.
const EVIDENCE_WEIGHT: f64 = 0.3;
/// Weight of the authority-tier component.
const AUTHORITY_WEIGHT: f64 = 0.2;

/// Precedence scoring model.
#[derive(Debug, Clone)]
pub struct PrecedenceModel {
    half_lives: BTreeMap<Domain, f64>,
    a1_floor: f64,
    current_year: i32,
}

impl Default for PrecedenceModel {
    fn default() -> Self {
        Self::new(
            Domain::all()
                .into_iter()
                .map(|d| (d, d.default_half_life_years()))
                .collect(),
            DEFAULT_A1_FLOOR,
            time::OffsetDateTime::now_utc().year(),
        )
    }
}

impl PrecedenceModel {
    /// Creates a model with explicit half-lives, A1 floor, and reference
    /// year. Tests pin `current_year` for determinism.
    #[must_use]
    pub const fn new(
        half_lives: BTreeMap<Domain, f64>,
        a1_floor: f64,
        current_year: i32,
    ) -> Self {
        Self {
            half_lives,
            a1_floor,
            current_year,
        }
    }

    /// Recency half-life in years for a domain.
    #[must_use]
    pub fn half_life_years(&self, domain: Domain) -> f64 {
        self.half_lives
            .get(&domain)
            .copied()
            .unwrap_or_else(|| domain.default_half_life_years())
    }

    /// Chunk age in years, never negative.
    #[must_use]
    pub fn age_years(&self, chunk: &Chunk) -> i32 {
        (self.current_year - chunk.year).max(0)
    }

    /// Recency weight `0.5^(age / half_life)`, with the A1 floor applied.
    #[must_use]
    pub fn recency(&self, chunk: &Chunk) -> f64 {
        let half_life = self.half_life_years(chunk.domain);
        let decayed = 0.5f64.powf(f64::from(self.age_years(chunk)) / half_life);
        if chunk.authority_tier == AuthorityTier::A1 {
            decayed.max(self.a1_floor)
        } else {
            decayed
        }
    }

    /// The composite precedence score, in [0,1].
    #[must_use]
    pub fn precedence(&self, chunk: &Chunk) -> f64 {
        RECENCY_WEIGHT * self.recency(chunk)
            + EVIDENCE_WEIGHT * chunk.evidence_level.weight()
            + AUTHORITY_WEIGHT * chunk.authority_tier.weight()
    }

    /// Returns `true` when a coding chunk has outlived its half-life by
    /// more than a year. The citation layer surfaces this as a warning.
    #[must_use]
    pub fn is_stale_coding(&self, chunk: &Chunk) -> bool {
        chunk.domain == Domain::CodingBilling
            && f64::from(self.age_years(chunk)) > self.half_life_years(chunk.domain) + 1.0
    }

    /// Standard-of-care guard condition: may this A4 chunk legitimately
    /// outrank that A1 chunk on the same topic?
    #[must_use]
    pub fn a4_may_outrank_a1(&self, a4: &Chunk, a1: &Chunk) -> bool {
        matches!(a4.evidence_level, EvidenceLevel::H1 | EvidenceLevel::H2)
            && a4.year >= a1.year + GUARD_RECENCY_ADVANTAGE
    }
}

/// Applies the standard-of-care guard over a score-sorted candidate list.
///
/// For each adjacent pair on the same topic cluster (sharing a primary
/// alias), a higher-ranked A4 chunk is swapped below the A1 chunk unless
/// the guard condition holds.
pub fn apply_standard_of_care_guard(model: &PrecedenceModel, hits: &mut [RetrievedHit]) {
    if hits.len() < 2 {
        return;
    }
    for i in 0..hits.len() - 1 {
        let (upper, lower) = (&hits[i], &hits[i + 1]);
        let same_topic = upper
            .chunk
            .aliases
            .intersection(&lower.chunk.aliases)
            .next()
            .is_some();
        if same_topic
            && upper.chunk.authority_tier == AuthorityTier::A4
            && lower.chunk.authority_tier == AuthorityTier::A1
            && !model.a4_may_outrank_a1(&upper.chunk, &lower.chunk)
        {
            hits.swap(i, i + 1);
        }
    }
}
