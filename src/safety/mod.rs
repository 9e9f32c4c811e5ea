//! Safety layer: emergency detection and pre/post synthesis checks.
//!
//! The pre-check inspects the query alone and can force routing to the
//! emergency fast path. The post-check inspects the synthesized draft
//! against its grounding: dose claims need multi-source corroboration
//! within a variance band, and safety-classed answers must address
//! contraindications. Violations never block the response; they set
//! `review_required` and attach warnings.

mod patterns;

pub use patterns::{
    CONTRAINDICATION_PATTERNS, DOSE_RE, DoseMention, EMERGENCY_PATTERNS, PEDIATRIC_PATTERNS,
    SafetyPattern, extract_doses,
};

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::core::{Chunk, ChunkTag, QueryClass};
use crate::error::{Error, Result};

/// Default minimum number of grounding chunks that must corroborate a dose.
pub const DEFAULT_DOSE_MIN_SOURCES: usize = 2;

/// Default permitted variance between a draft dose and a grounding dose.
pub const DEFAULT_DOSE_VARIANCE_PCT: f64 = 20.0;

/// Safety layer tuning.
#[derive(Debug, Clone)]
pub struct SafetyTuning {
    /// Minimum corroborating grounding chunks per dose claim.
    pub dose_confirm_min_sources: usize,
    /// Permitted dose variance, percent.
    pub dose_variance_pct: f64,
    /// Extra pediatric keywords from configuration.
    pub extra_pediatric_keywords: Vec<String>,
    /// Extra emergency patterns from configuration.
    pub extra_emergency_patterns: Vec<String>,
}

impl Default for SafetyTuning {
    fn default() -> Self {
        Self {
            dose_confirm_min_sources: DEFAULT_DOSE_MIN_SOURCES,
            dose_variance_pct: DEFAULT_DOSE_VARIANCE_PCT,
            extra_pediatric_keywords: Vec::new(),
            extra_emergency_patterns: Vec::new(),
        }
    }
}

/// Result of the query-only pre-check.
#[derive(Debug, Default, Clone)]
pub struct PreCheck {
    /// Query matches an emergency pattern; the orchestrator takes the
    /// fast path.
    pub is_emergency: bool,
    /// Query carries pediatric context.
    pub pediatric: bool,
    /// Dose mentions found in the query.
    pub doses: Vec<DoseMention>,
    /// Warnings to attach to the response.
    pub warnings: Vec<String>,
}

/// Result of the draft post-check.
#[derive(Debug, Default, Clone)]
pub struct PostCheck {
    /// Warnings to attach to the response.
    pub warnings: Vec<String>,
    /// True when a violation requires human review of the draft.
    pub review_required: bool,
}

/// The safety layer.
pub struct SafetyLayer {
    tuning: SafetyTuning,
    extra_emergency: Vec<Regex>,
}

impl SafetyLayer {
    /// Creates the layer, compiling any configured extra patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an extra pattern fails to
    /// compile.
    pub fn new(tuning: SafetyTuning) -> Result<Self> {
        let extra_emergency = tuning
            .extra_emergency_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config {
                    message: format!("bad emergency pattern {p:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tuning,
            extra_emergency,
        })
    }

    /// Inspects the query alone, before retrieval.
    #[must_use]
    pub fn pre_check(&self, query: &str) -> PreCheck {
        let mut check = PreCheck::default();

        for pattern in EMERGENCY_PATTERNS.iter() {
            if pattern.is_match(query) {
                check.is_emergency = true;
                check
                    .warnings
                    .push(format!("emergency pattern detected: {}", pattern.description));
                break;
            }
        }
        if !check.is_emergency {
            for regex in &self.extra_emergency {
                if regex.is_match(query) {
                    check.is_emergency = true;
                    check.warnings.push("emergency pattern detected".to_string());
                    break;
                }
            }
        }

        let query_lower = query.to_lowercase();
        check.pediatric = PEDIATRIC_PATTERNS.iter().any(|p| p.is_match(query))
            || self
                .tuning
                .extra_pediatric_keywords
                .iter()
                .any(|kw| query_lower.contains(&kw.to_lowercase()));
        if check.pediatric {
            check
                .warnings
                .push("pediatric context: verify weight-based dosing and device sizing".to_string());
        }

        check.doses = extract_doses(query);
        if !check.doses.is_empty() {
            check
                .warnings
                .push("query contains absolute doses; answer doses require corroboration".to_string());
        }

        check
    }

    /// Inspects the synthesized draft against its grounding chunks.
    #[must_use]
    pub fn post_check(
        &self,
        draft: &str,
        grounding: &[Arc<Chunk>],
        class: QueryClass,
    ) -> PostCheck {
        let mut check = PostCheck::default();

        for dose in extract_doses(draft) {
            let supporting = grounding
                .iter()
                .filter(|chunk| self.chunk_corroborates(chunk, &dose))
                .count();
            if supporting < self.tuning.dose_confirm_min_sources {
                warn!(
                    value = dose.value,
                    unit = %dose.unit,
                    supporting,
                    "dose claim lacks corroboration"
                );
                check.warnings.push(format!(
                    "unsupported dose claim: {} {} corroborated by {supporting} of {} required sources",
                    dose.value, dose.unit, self.tuning.dose_confirm_min_sources
                ));
                check.review_required = true;
            }
        }

        let grounding_has_contraindication = grounding
            .iter()
            .any(|chunk| chunk.has_tag(ChunkTag::HasContraindication));
        if (class == QueryClass::Safety || grounding_has_contraindication)
            && !CONTRAINDICATION_PATTERNS.iter().any(|p| p.is_match(draft))
        {
            check.warnings.push(
                "draft omits contraindication discussion present in the evidence".to_string(),
            );
            check.review_required = true;
        }

        check
    }

    /// Surfaces contraindication sentences from grounding chunks, for
    /// safety-classed responses.
    #[must_use]
    pub fn contraindication_highlights(&self, grounding: &[Arc<Chunk>]) -> Vec<String> {
        let mut highlights = Vec::new();
        for chunk in grounding {
            if !chunk.has_tag(ChunkTag::HasContraindication) {
                continue;
            }
            for sentence in chunk.text.split('.') {
                let sentence = sentence.trim();
                if !sentence.is_empty()
                    && CONTRAINDICATION_PATTERNS.iter().any(|p| p.is_match(sentence))
                {
                    highlights.push(sentence.to_string());
                }
            }
        }
        highlights
    }

    /// True when a grounding chunk carries a dose of the same unit within
    /// the variance band.
    fn chunk_corroborates(&self, chunk: &Chunk, dose: &DoseMention) -> bool {
        extract_doses(&chunk.text).iter().any(|grounded| {
            grounded.unit == dose.unit
                && variance_pct(grounded.value, dose.value) <= self.tuning.dose_variance_pct
        })
    }
}

/// Relative difference between two values, in percent of the reference.
fn variance_pct(reference: f64, claimed: f64) -> f64 {
    if reference == 0.0 {
        if claimed == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        ((claimed - reference) / reference).abs() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AuthorityTier, DocType, Domain, EvidenceLevel, SectionKind,
    };
    use std::collections::BTreeSet;

    fn layer() -> SafetyLayer {
        SafetyLayer::new(SafetyTuning::default()).unwrap()
    }

    fn grounding_chunk(id: &str, text: &str, tags: &[ChunkTag]) -> Arc<Chunk> {
        Arc::new(Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            doc_id: "d".to_string(),
            doc_type: DocType::BookChapter,
            section_title: "s".to_string(),
            section_kind: SectionKind::General,
            year: 2024,
            authority_tier: AuthorityTier::A1,
            evidence_level: EvidenceLevel::H3,
            domain: Domain::Clinical,
            cpt_codes: BTreeSet::new(),
            aliases: BTreeSet::new(),
            tags: tags.iter().copied().collect(),
        })
    }

    #[test]
    fn test_pre_check_emergency() {
        let check = layer().pre_check("management of massive hemoptysis >200 ml");
        assert!(check.is_emergency);
        assert!(!check.warnings.is_empty());
    }

    #[test]
    fn test_pre_check_pediatric() {
        let check = layer().pre_check("balloon dilation in a 3 year old");
        assert!(check.pediatric);
        assert!(!check.is_emergency);
    }

    #[test]
    fn test_pre_check_plain_query() {
        let check = layer().pre_check("fiducial marker placement requirements");
        assert!(!check.is_emergency);
        assert!(!check.pediatric);
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn test_pre_check_extra_pattern() {
        let layer = SafetyLayer::new(SafetyTuning {
            extra_emergency_patterns: vec![r"(?i)\bcode\s+blue\b".to_string()],
            ..SafetyTuning::default()
        })
        .unwrap();
        assert!(layer.pre_check("code blue in bronch suite").is_emergency);
    }

    #[test]
    fn test_bad_extra_pattern_is_config_error() {
        let result = SafetyLayer::new(SafetyTuning {
            extra_emergency_patterns: vec!["[unclosed".to_string()],
            ..SafetyTuning::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_post_check_corroborated_dose() {
        let grounding = vec![
            grounding_chunk("c1", "instill lidocaine 40 mg topically", &[ChunkTag::HasDose]),
            grounding_chunk("c2", "a 40 mg lidocaine aliquot is typical", &[ChunkTag::HasDose]),
        ];
        let check = layer().post_check(
            "Topical lidocaine 40 mg is applied.",
            &grounding,
            QueryClass::Clinical,
        );
        assert!(!check.review_required);
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn test_post_check_unsupported_dose() {
        let grounding = vec![grounding_chunk("c1", "no numbers here", &[])];
        let check = layer().post_check(
            "Give 400 mg of lidocaine.",
            &grounding,
            QueryClass::Clinical,
        );
        assert!(check.review_required);
        assert!(check.warnings.iter().any(|w| w.contains("unsupported dose")));
    }

    #[test]
    fn test_post_check_dose_variance_band() {
        // 44 is within 20% of 40; 60 is not.
        let grounding = vec![
            grounding_chunk("c1", "lidocaine 40 mg", &[ChunkTag::HasDose]),
            grounding_chunk("c2", "lidocaine 40 mg standard", &[ChunkTag::HasDose]),
        ];
        let ok = layer().post_check("use 44 mg", &grounding, QueryClass::Clinical);
        assert!(!ok.review_required);
        let bad = layer().post_check("use 60 mg", &grounding, QueryClass::Clinical);
        assert!(bad.review_required);
    }

    #[test]
    fn test_post_check_safety_class_needs_contraindications() {
        let check = layer().post_check(
            "SEMS can be placed with a rigid scope.",
            &[],
            QueryClass::Safety,
        );
        assert!(check.review_required);
        assert!(check
            .warnings
            .iter()
            .any(|w| w.contains("contraindication")));

        let covered = layer().post_check(
            "SEMS are contraindicated in benign resectable disease.",
            &[],
            QueryClass::Safety,
        );
        assert!(!covered.review_required);
    }

    #[test]
    fn test_contraindication_highlights() {
        let grounding = vec![grounding_chunk(
            "c1",
            "SEMS placement is effective for palliation. SEMS are contraindicated in resectable disease.",
            &[ChunkTag::HasContraindication],
        )];
        let highlights = layer().contraindication_highlights(&grounding);
        assert_eq!(highlights.len(), 1);
        assert!(highlights[0].contains("contraindicated in resectable disease"));
    }
}
