//! Compiled safety pattern batteries.
//!
//! Each battery is a list of compiled patterns with a short label used in
//! warnings. Patterns are compiled once behind `LazyLock`; the set is
//! closed, with config-supplied extras compiled separately by the layer.

use std::sync::LazyLock;

use regex::Regex;

/// A compiled pattern with its warning metadata.
pub struct SafetyPattern {
    regex: Regex,
    /// Short label used in warnings and logs.
    pub label: &'static str,
    /// Human-readable description of what the pattern detects.
    pub description: &'static str,
}

impl SafetyPattern {
    /// Returns `true` if the pattern matches the text.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

#[allow(clippy::unwrap_used)]
fn pattern(re: &str, label: &'static str, description: &'static str) -> SafetyPattern {
    SafetyPattern {
        regex: Regex::new(re).unwrap(),
        label,
        description,
    }
}

/// Emergency presentation patterns.
pub static EMERGENCY_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\bmassive\s+hemoptysis\b",
            "massive_hemoptysis",
            "Massive hemoptysis",
        ),
        pattern(
            r"(?i)\bhemoptysis\b[^.]{0,40}\b(?:>|over|more\s+than)\s*\d{2,4}\s*m?l\b",
            "large_volume_hemoptysis",
            "Hemoptysis with a quantified large volume",
        ),
        pattern(
            r"(?i)\btension\s+pneumothorax\b",
            "tension_pneumothorax",
            "Tension pneumothorax",
        ),
        pattern(
            r"(?i)\b(?:complete|critical|acute)\s+(?:central\s+)?airway\s+obstruction\b",
            "airway_obstruction",
            "Critical central airway obstruction",
        ),
        pattern(
            r"(?i)\bforeign\s+body\s+(?:aspiration|in\s+the\s+airway)\b",
            "foreign_body",
            "Airway foreign body",
        ),
        pattern(
            r"(?i)\bstridor\s+at\s+rest\b",
            "stridor_at_rest",
            "Stridor at rest",
        ),
        pattern(
            r"(?i)\bcannot\s+(?:ventilate|intubate|oxygenate)\b",
            "cannot_ventilate",
            "Cannot ventilate / cannot intubate",
        ),
        pattern(
            r"(?i)\bairway\s+(?:fire|hemorrhage)\b",
            "airway_catastrophe",
            "Intraoperative airway catastrophe",
        ),
    ]
});

/// Pediatric context patterns.
pub static PEDIATRIC_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\b(?:pediatric|paediatric)\b",
            "pediatric",
            "Pediatric context",
        ),
        pattern(
            r"(?i)\b(?:child|children|infant|neonate|toddler)\b",
            "pediatric_patient",
            "Pediatric patient words",
        ),
        pattern(
            r"(?i)\b\d+\s*[-\s]?(?:year|month)[-\s]old\b",
            "stated_age",
            "Stated patient age",
        ),
        pattern(
            r"(?i)\bmg\s*/\s*kg\b",
            "weight_based_dosing",
            "Weight-based dosing",
        ),
    ]
});

/// Contraindication language patterns.
pub static CONTRAINDICATION_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\bcontraindicat(?:ed|ion|ions)\b",
            "contraindication",
            "Explicit contraindication language",
        ),
        pattern(
            r"(?i)\bshould\s+not\s+be\s+(?:used|placed|performed)\b",
            "negative_recommendation",
            "Negative recommendation",
        ),
        pattern(
            r"(?i)\bavoid(?:ed)?\s+in\b",
            "avoid_in",
            "Avoid-in language",
        ),
    ]
});

/// Absolute dose mention: numeric value plus a dose unit.
pub static DOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>mcg|mg|g|ml|units?|joules?|watts?)\b")
        .unwrap()
});

/// A numeric dose mention extracted from text.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseMention {
    /// Numeric value.
    pub value: f64,
    /// Lowercased unit.
    pub unit: String,
}

/// Extracts every dose mention from the text.
#[must_use]
pub fn extract_doses(text: &str) -> Vec<DoseMention> {
    DOSE_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let value: f64 = cap.name("value")?.as_str().parse().ok()?;
            let unit = cap.name("unit")?.as_str().to_lowercase();
            // Normalize the plural of unit-less "units"
            let unit = if unit == "unit" { "units".to_string() } else { unit };
            Some(DoseMention { value, unit })
        })
        .collect()
}
