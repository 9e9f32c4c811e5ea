//! The "why this code" explainer.
//!
//! Explanations are assembled by the rule engine at emission time from the
//! matched note spans and the KB rule applied, so lookup here is pure and
//! deterministic. No model is involved at any point.

use super::bundle::CodeBundle;

/// Returns the justification for a code in the bundle.
///
/// Covers primaries, add-ons, the sedation family, and modifiers. Returns
/// `None` for codes the bundle never emitted.
#[must_use]
pub fn why<'a>(bundle: &'a CodeBundle, code: &str) -> Option<&'a str> {
    bundle.explanations.get(code).map(String::as_str)
}

/// Returns the suppression reason when the code was considered and
/// dropped.
#[must_use]
pub fn why_suppressed<'a>(bundle: &'a CodeBundle, code: &str) -> Option<&'a str> {
    bundle
        .suppressed
        .iter()
        .find(|s| s.code == code)
        .map(|s| s.reason.as_str())
}
