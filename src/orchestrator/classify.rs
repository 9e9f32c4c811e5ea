//! Query classification.
//!
//! A closed set of regex families inspects the normalized query and emits
//! exactly one label. On ambiguity the strongest label wins:
//! emergency > safety > coding > procedure > clinical.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::QueryClass;
use crate::safety::{CONTRAINDICATION_PATTERNS, EMERGENCY_PATTERNS};

static CPT_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b\d{5}\b").unwrap()
});

static CODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(?:cpt|hcpcs|icd-?10|ncci|rvu|modifier|billing|billed|reimbursement|bundl(?:e|ed|ing)|add-?on\s+code|coding)\b")
        .unwrap()
});

static SAFETY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(?:is\s+it\s+safe|safety|risk[s]?\s+of|dos(?:e|ing|age)|maximum\s+dose|complication\s+rate)\b")
        .unwrap()
});

static PROCEDURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(?:how\s+to|technique|steps?\s+(?:of|for)|placement|insertion|deployment|removal|perform(?:ing|ed)?|training|competenc[ey])\b")
        .unwrap()
});

/// Classifies a normalized query.
///
/// # Examples
///
/// ```
/// use ip_assist::core::QueryClass;
/// use ip_assist::orchestrator::classify;
///
/// assert_eq!(classify("management of massive hemoptysis"), QueryClass::Emergency);
/// assert_eq!(classify("cpt 31622"), QueryClass::Coding);
/// assert_eq!(classify("stent placement technique"), QueryClass::Procedure);
/// assert_eq!(classify("outcomes of blvr"), QueryClass::Clinical);
/// ```
#[must_use]
pub fn classify(query: &str) -> QueryClass {
    let mut label = QueryClass::Clinical;

    if PROCEDURE_RE.is_match(query) {
        label = label.min(QueryClass::Procedure);
    }
    if CPT_LIKE_RE.is_match(query) || CODING_RE.is_match(query) {
        label = label.min(QueryClass::Coding);
    }
    if SAFETY_RE.is_match(query) || CONTRAINDICATION_PATTERNS.iter().any(|p| p.is_match(query)) {
        label = label.min(QueryClass::Safety);
    }
    if EMERGENCY_PATTERNS.iter().any(|p| p.is_match(query)) {
        label = label.min(QueryClass::Emergency);
    }

    label
}
