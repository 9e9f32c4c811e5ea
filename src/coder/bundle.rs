//! The code bundle returned by the rule engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A code dropped by a rule, with the reason recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressedCode {
    /// The suppressed code.
    pub code: String,
    /// Why it was dropped.
    pub reason: String,
}

/// The deterministic coding result for one operative note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBundle {
    /// Primary CPT codes.
    pub primary_cpts: Vec<String>,
    /// Add-on CPT codes (one entry per billable unit).
    pub add_on_cpts: Vec<String>,
    /// HCPCS supply codes.
    pub hcpcs: Vec<String>,
    /// Modifiers (e.g. "-50").
    pub modifiers: Vec<String>,
    /// Moderate-sedation family base code, when billable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sedation_family: Option<String>,
    /// ICD-10-PCS codes from the crosswalk.
    pub icd10_pcs: Vec<String>,
    /// Codes dropped by suppression rules, with reasons.
    pub suppressed: Vec<SuppressedCode>,
    /// Documentation-gap and processing warnings.
    pub warnings: Vec<String>,
    /// Version of the KB that produced this bundle.
    pub kb_version: String,
    /// Deterministic justification per emitted code.
    pub explanations: BTreeMap<String, String>,
}

impl CodeBundle {
    /// Every billable CPT in the bundle, primaries then add-ons.
    #[must_use]
    pub fn all_cpts(&self) -> Vec<&str> {
        self.primary_cpts
            .iter()
            .chain(self.add_on_cpts.iter())
            .map(String::as_str)
            .collect()
    }

    /// True when the bundle emits no codes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary_cpts.is_empty()
            && self.add_on_cpts.is_empty()
            && self.hcpcs.is_empty()
            && self.sedation_family.is_none()
            && self.icd10_pcs.is_empty()
    }

    /// Records a suppression.
    pub fn suppress(&mut self, code: &str, reason: &str) {
        self.suppressed.push(SuppressedCode {
            code: code.to_string(),
            reason: reason.to_string(),
        });
    }
}
