//! The procedural coder: operative note to code bundle, deterministically.
//!
//! Pipeline: note text → pattern extraction → rule engine over the coding
//! KB → [`CodeBundle`] with suppressions, warnings, coverage gaps, and a
//! per-code explainer. No model is involved; the same note and KB always
//! produce the same bundle.

mod bundle;
mod explain;
mod extract;
mod items;
mod kb;
mod rules;

pub use bundle::{CodeBundle, SuppressedCode};
pub use explain::{why, why_suppressed};
pub use extract::{Extraction, NoteExtractor, SedationContext};
pub use items::{PerformedItem, ProcedureId, Site};
pub use kb::CodingKb;
pub use rules::RuleEngine;

use serde::{Deserialize, Serialize};

/// Patient context accompanying a coding request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientContext {
    /// Patient age in years, when known. Selects the pediatric sedation
    /// base code under five.
    #[serde(default)]
    pub age_years: Option<u32>,
}

/// The coding request record.
#[derive(Debug, Clone, Deserialize)]
pub struct CodingRequest {
    /// The operative note text.
    pub note: String,
    /// Optional patient context.
    #[serde(default)]
    pub patient_ctx: Option<PatientContext>,
}

/// The procedural coder: extractor plus rule engine over a loaded KB.
pub struct ProceduralCoder {
    kb: CodingKb,
    extractor: NoteExtractor,
}

impl ProceduralCoder {
    /// Creates a coder over a loaded KB.
    #[must_use]
    pub const fn new(kb: CodingKb) -> Self {
        Self {
            kb,
            extractor: NoteExtractor,
        }
    }

    /// The KB version stamped on every bundle.
    #[must_use]
    pub fn kb_version(&self) -> &str {
        self.kb.version()
    }

    /// Codes an operative note.
    #[must_use]
    pub fn code_note(&self, note: &str, patient: Option<&PatientContext>) -> CodeBundle {
        let extraction = self.extractor.extract(note);
        RuleEngine::apply(&extraction, &self.kb, patient)
    }

    /// Codes a full request record.
    #[must_use]
    pub fn code(&self, request: &CodingRequest) -> CodeBundle {
        self.code_note(&request.note, request.patient_ctx.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB_JSON: &str = r#"{
        "version": "2026-q1",
        "cpt_descriptions": {
            "31622": "Bronchoscopy, diagnostic",
            "31652": "Bronchoscopy with EBUS-TBNA, 1 or 2 stations",
            "31653": "Bronchoscopy with EBUS-TBNA, 3 or more stations"
        },
        "ncci_bundles": {},
        "bilateral_eligible": [],
        "addon_families": {},
        "icd10_pcs_crosswalk": {"ebus_tbna": ["0BD58ZX"]},
        "hcpcs_supplies": {}
    }"#;

    fn coder() -> ProceduralCoder {
        ProceduralCoder::new(CodingKb::from_json(KB_JSON, "test").unwrap())
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let bundle = coder().code_note(
            "Convex EBUS-TBNA with sampling of stations 4R, 7, and 11L; 22G needle x3 passes each; \
             ROSE adequate. Patient under general anesthesia via ETT.",
            None,
        );
        assert_eq!(bundle.primary_cpts, vec!["31653".to_string()]);
        assert!(bundle.sedation_family.is_none());
        assert_eq!(bundle.kb_version, "2026-q1");
        assert!(why(&bundle, "31653").unwrap().contains("11L"));
    }

    #[test]
    fn test_code_request_record() {
        let request: CodingRequest = serde_json::from_str(
            r#"{"note": "EBUS-TBNA of station 7. Sedation start 09:00. Sedation end 09:20.", "patient_ctx": {"age_years": 62}}"#,
        )
        .unwrap();
        let bundle = coder().code(&request);
        assert_eq!(bundle.primary_cpts, vec!["31652".to_string()]);
        assert_eq!(bundle.sedation_family.as_deref(), Some("99152"));
    }

    #[test]
    fn test_determinism() {
        let note = "Convex EBUS-TBNA with sampling of stations 4R and 7; general anesthesia via LMA.";
        let a = coder().code_note(note, None);
        let b = coder().code_note(note, None);
        assert_eq!(a.primary_cpts, b.primary_cpts);
        assert_eq!(a.warnings, b.warnings);
        assert_eq!(a.explanations, b.explanations);
    }
}
