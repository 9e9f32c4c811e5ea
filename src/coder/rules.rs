//! The coding rule engine.
//!
//! Maps performed items to CPT, add-on, HCPCS, modifier, sedation-family,
//! and ICD-10-PCS suggestions under the suppression rules: diagnostic
//! bronchoscopy never bills beside surgical bronchoscopy, dilation bundles
//! into stenting, excision supersedes destruction, NCCI component codes
//! drop against their absorbers, and moderate sedation never bills under
//! general anesthesia. The engine returns an empty bundle with warnings
//! rather than raising.

use std::collections::BTreeSet;

use tracing::debug;

use super::bundle::CodeBundle;
use super::extract::Extraction;
use super::items::{PerformedItem, ProcedureId, Site};
use super::kb::CodingKb;
use super::PatientContext;

const CPT_DIAGNOSTIC_BRONCH: &str = "31622";
const CPT_DILATION: &str = "31630";
const CPT_TRACHEAL_STENT: &str = "31631";
const CPT_BRONCHIAL_STENT: &str = "31636";
const CPT_BRONCHIAL_STENT_ADDON: &str = "31637";
const CPT_EXCISION: &str = "31640";
const CPT_DESTRUCTION: &str = "31641";
const CPT_EBUS_ONE_TWO: &str = "31652";
const CPT_EBUS_THREE_PLUS: &str = "31653";
const CPT_RADIAL_EBUS_ADDON: &str = "31654";
const CPT_TBLB: &str = "31628";
const CPT_TBLB_ADDON: &str = "31632";
const CPT_WLL: &str = "32997";

const SEDATION_BASE: &str = "99152";
const SEDATION_BASE_UNDER_FIVE: &str = "99151";

/// Stations at or above this count select the multi-station EBUS code.
const MULTI_STATION_THRESHOLD: usize = 3;

/// Minimum documented minutes before moderate sedation is separately
/// billable.
const SEDATION_MIN_MINUTES: u32 = 10;

/// Minutes at which the first additional sedation unit accrues.
const SEDATION_ADDON_FLOOR: u32 = 23;

/// The deterministic rule engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    /// Applies the full rule set to an extraction.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn apply(
        extraction: &Extraction,
        kb: &CodingKb,
        patient: Option<&PatientContext>,
    ) -> CodeBundle {
        let mut bundle = CodeBundle {
            kb_version: kb.version().to_string(),
            ..CodeBundle::default()
        };

        if extraction.low_confidence {
            bundle
                .warnings
                .push("manual coding required: no procedure patterns matched".to_string());
            return bundle;
        }

        let has_stent = extraction.items.iter().any(|item| {
            matches!(
                item.id,
                ProcedureId::TrachealStentInsertion | ProcedureId::BronchialStentInsertion
            )
        });
        let has_excision = extraction
            .items
            .iter()
            .any(|item| item.id == ProcedureId::TumorExcisionBronchoscopic);

        for item in &extraction.items {
            Self::apply_item(item, kb, has_stent, has_excision, &mut bundle);
        }

        // Diagnostic bronchoscopy is bundled into every surgical code.
        if !bundle.primary_cpts.is_empty() || !bundle.add_on_cpts.is_empty() {
            bundle.suppress(
                CPT_DIAGNOSTIC_BRONCH,
                "diagnostic bronchoscopy is bundled into surgical bronchoscopy",
            );
        }

        Self::drop_codes_missing_from_kb(kb, &mut bundle);
        Self::apply_ncci_edits(kb, &mut bundle);
        Self::check_addon_families(kb, &mut bundle);
        Self::apply_bilateral_modifier(extraction, kb, &mut bundle);
        Self::apply_sedation(extraction, patient, &mut bundle);

        if bundle.add_on_cpts.iter().any(|c| c == CPT_RADIAL_EBUS_ADDON)
            && bundle.primary_cpts.is_empty()
        {
            bundle.warnings.push(format!(
                "add-on {CPT_RADIAL_EBUS_ADDON} requires a primary bronchoscopy code"
            ));
        }

        debug!(
            primaries = bundle.primary_cpts.len(),
            addons = bundle.add_on_cpts.len(),
            suppressed = bundle.suppressed.len(),
            "rule engine complete"
        );
        bundle
    }

    #[allow(clippy::too_many_lines)]
    fn apply_item(
        item: &PerformedItem,
        kb: &CodingKb,
        has_stent: bool,
        has_excision: bool,
        bundle: &mut CodeBundle,
    ) {
        match item.id {
            ProcedureId::TrachealStentInsertion => {
                Self::emit_primary(
                    bundle,
                    CPT_TRACHEAL_STENT,
                    kb,
                    item,
                    "tracheal and Y-stent placement maps to 31631",
                );
                Self::stent_gaps(item, bundle);
            }
            ProcedureId::BronchialStentInsertion => {
                Self::emit_primary(
                    bundle,
                    CPT_BRONCHIAL_STENT,
                    kb,
                    item,
                    "initial bronchial stent placement maps to 31636",
                );
                for _ in 1..item.count {
                    bundle.add_on_cpts.push(CPT_BRONCHIAL_STENT_ADDON.to_string());
                }
                if item.count > 1 {
                    bundle.explanations.insert(
                        CPT_BRONCHIAL_STENT_ADDON.to_string(),
                        format!(
                            "each additional major bronchus stented bills 31637 ({} additional)",
                            item.count - 1
                        ),
                    );
                }
                Self::stent_gaps(item, bundle);
            }
            ProcedureId::AirwayDilationOnly => {
                if has_stent {
                    bundle.suppress(
                        CPT_DILATION,
                        "dilation performed to place a stent is bundled into the stent code",
                    );
                } else {
                    Self::emit_primary(
                        bundle,
                        CPT_DILATION,
                        kb,
                        item,
                        "airway dilation without stenting maps to 31630",
                    );
                }
            }
            ProcedureId::TumorExcisionBronchoscopic => {
                Self::emit_primary(
                    bundle,
                    CPT_EXCISION,
                    kb,
                    item,
                    "bronchoscopic tumor excision maps to 31640",
                );
            }
            ProcedureId::TumorDestructionBronchoscopic => {
                if has_excision {
                    bundle.suppress(
                        CPT_DESTRUCTION,
                        "excision (higher work) supersedes destruction in the same session",
                    );
                } else {
                    Self::emit_primary(
                        bundle,
                        CPT_DESTRUCTION,
                        kb,
                        item,
                        "bronchoscopic tumor destruction maps to 31641",
                    );
                }
            }
            ProcedureId::WholeLungLavage => {
                Self::emit_primary(
                    bundle,
                    CPT_WLL,
                    kb,
                    item,
                    "whole lung lavage maps to 32997",
                );
                if !item.details.contains_key("laterality") {
                    bundle
                        .warnings
                        .push("lavage laterality not documented".to_string());
                }
            }
            ProcedureId::EbusTbna => {
                let stations: Vec<&str> =
                    item.stations.iter().map(String::as_str).collect();
                if item.stations.len() >= MULTI_STATION_THRESHOLD {
                    Self::emit_primary(
                        bundle,
                        CPT_EBUS_THREE_PLUS,
                        kb,
                        item,
                        &format!(
                            "EBUS-TBNA sampled {} unique stations ({}); 3 or more stations maps to 31653",
                            item.stations.len(),
                            stations.join(", ")
                        ),
                    );
                } else {
                    Self::emit_primary(
                        bundle,
                        CPT_EBUS_ONE_TWO,
                        kb,
                        item,
                        &format!(
                            "EBUS-TBNA sampled {} station(s) ({}); 1 or 2 stations maps to 31652",
                            item.stations.len().max(1),
                            if stations.is_empty() {
                                "unlabeled".to_string()
                            } else {
                                stations.join(", ")
                            }
                        ),
                    );
                }
                if item.stations.len() >= 2 && !item.details.contains_key("elastography") {
                    bundle
                        .warnings
                        .push("EBUS elastography not documented for staging examination".to_string());
                }
            }
            ProcedureId::EbusWithoutTbna => {
                bundle.add_on_cpts.push(CPT_RADIAL_EBUS_ADDON.to_string());
                bundle.explanations.insert(
                    CPT_RADIAL_EBUS_ADDON.to_string(),
                    Self::explanation(item, "EBUS without sampling bills as add-on 31654", kb, CPT_RADIAL_EBUS_ADDON),
                );
            }
            ProcedureId::TblbForcepsOrCryo => {
                Self::emit_primary(
                    bundle,
                    CPT_TBLB,
                    kb,
                    item,
                    &format!(
                        "transbronchial biopsy of the first lobe ({}) maps to 31628",
                        item.lobes.first().map_or("undocumented", String::as_str)
                    ),
                );
                for lobe in item.lobes.iter().skip(1) {
                    bundle.add_on_cpts.push(CPT_TBLB_ADDON.to_string());
                    bundle.explanations.insert(
                        CPT_TBLB_ADDON.to_string(),
                        format!("each additional lobe biopsied bills 31632 (additional lobe: {lobe})"),
                    );
                }
                if item.lobes.is_empty() {
                    bundle
                        .warnings
                        .push("biopsy lobe not documented".to_string());
                }
            }
        }

        for code in kb.icd10_pcs_for(item.id.as_str()) {
            if !bundle.icd10_pcs.contains(code) {
                bundle.icd10_pcs.push(code.clone());
            }
        }
        for code in kb.hcpcs_for(item.id.as_str()) {
            if !bundle.hcpcs.contains(code) {
                bundle.hcpcs.push(code.clone());
            }
        }
    }

    fn emit_primary(
        bundle: &mut CodeBundle,
        code: &str,
        kb: &CodingKb,
        item: &PerformedItem,
        rule: &str,
    ) {
        if bundle.primary_cpts.iter().any(|c| c == code) {
            return;
        }
        bundle.primary_cpts.push(code.to_string());
        bundle
            .explanations
            .insert(code.to_string(), Self::explanation(item, rule, kb, code));
    }

    /// Deterministic, source-only justification: the rule, the matched
    /// note spans, and the KB description.
    fn explanation(item: &PerformedItem, rule: &str, kb: &CodingKb, code: &str) -> String {
        let mut parts = vec![rule.to_string()];
        if !item.matched_spans.is_empty() {
            parts.push(format!("matched note text: \"{}\"", item.matched_spans.join("\" | \"")));
        }
        if let Some(description) = kb.describe(code) {
            parts.push(format!("KB: {description}"));
        }
        parts.join("; ")
    }

    fn stent_gaps(item: &PerformedItem, bundle: &mut CodeBundle) {
        if !item.details.contains_key("size") {
            bundle.warnings.push("stent size not documented".to_string());
        }
        if item.site == Site::Unknown {
            bundle
                .warnings
                .push("stent site (tracheal vs bronchial) not documented".to_string());
        }
    }

    /// Drops emitted codes the KB has never heard of.
    fn drop_codes_missing_from_kb(kb: &CodingKb, bundle: &mut CodeBundle) {
        let version = kb.version().to_string();
        let mut dropped: Vec<String> = Vec::new();
        let mut keep = |code: &String| {
            if kb.knows(code) {
                true
            } else {
                dropped.push(code.clone());
                false
            }
        };
        bundle.primary_cpts.retain(&mut keep);
        bundle.add_on_cpts.retain(&mut keep);
        for code in dropped {
            bundle.warnings.push(format!(
                "kb_version_mismatch: {code} is absent from KB {version}; dropped"
            ));
            bundle.suppress(&code, "code absent from the loaded KB");
            bundle.explanations.remove(&code);
        }
    }

    /// NCCI edits: a component code drops when any of its absorbers is
    /// also billed.
    fn apply_ncci_edits(kb: &CodingKb, bundle: &mut CodeBundle) {
        let billed: BTreeSet<String> = bundle
            .all_cpts()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut to_drop: Vec<(String, String)> = Vec::new();
        for code in &billed {
            if let Some(absorbers) = kb.ncci_absorbers(code)
                && let Some(absorber) = absorbers.iter().find(|a| billed.contains(*a))
            {
                to_drop.push((code.clone(), absorber.clone()));
            }
        }
        for (code, absorber) in to_drop {
            bundle.primary_cpts.retain(|c| c != &code);
            bundle.add_on_cpts.retain(|c| c != &code);
            bundle.explanations.remove(&code);
            bundle.suppress(&code, &format!("NCCI edit: {code} bundles into {absorber}"));
        }
    }

    /// Add-on codes whose KB family names a primary must ride with one.
    fn check_addon_families(kb: &CodingKb, bundle: &mut CodeBundle) {
        let addons: BTreeSet<String> = bundle.add_on_cpts.iter().cloned().collect();
        for addon in addons {
            let claiming = kb.primaries_for_addon(&addon);
            if claiming.is_empty() {
                continue;
            }
            let satisfied = claiming
                .iter()
                .any(|primary| bundle.primary_cpts.iter().any(|billed| billed == primary));
            if !satisfied {
                bundle.warnings.push(format!(
                    "add-on {addon} billed without its primary ({})",
                    claiming.join(", ")
                ));
            }
        }
    }

    fn apply_bilateral_modifier(extraction: &Extraction, kb: &CodingKb, bundle: &mut CodeBundle) {
        if !extraction.bilateral {
            return;
        }
        let eligible: Vec<String> = bundle
            .all_cpts()
            .into_iter()
            .filter(|code| kb.is_bilateral_eligible(code))
            .map(str::to_string)
            .collect();
        if eligible.is_empty() {
            bundle
                .warnings
                .push("bilateral evidence without bilateral-eligible code".to_string());
        } else {
            bundle.modifiers.push("-50".to_string());
            bundle.explanations.insert(
                "-50".to_string(),
                format!(
                    "bilateral evidence in the note; applies to {}",
                    eligible.join(", ")
                ),
            );
        }
    }

    fn apply_sedation(
        extraction: &Extraction,
        patient: Option<&PatientContext>,
        bundle: &mut CodeBundle,
    ) {
        let sedation = &extraction.sedation;

        if sedation.general_anesthesia {
            bundle
                .warnings
                .push("no moderate sedation under GA".to_string());
            if sedation.moderate_documented || sedation.minutes.is_some() {
                bundle.suppress(SEDATION_BASE, "no moderate sedation under GA");
            }
            return;
        }

        match sedation.minutes {
            Some(minutes) if minutes < SEDATION_MIN_MINUTES => {
                bundle.warnings.push(format!(
                    "sedation of {minutes} documented minutes is below the billable threshold"
                ));
            }
            Some(minutes) => {
                let under_five = patient
                    .and_then(|p| p.age_years)
                    .is_some_and(|age| age < 5);
                let base = if under_five {
                    SEDATION_BASE_UNDER_FIVE
                } else {
                    SEDATION_BASE
                };
                let additional_units = if minutes >= SEDATION_ADDON_FLOOR {
                    1 + (minutes - SEDATION_ADDON_FLOOR) / 15
                } else {
                    0
                };
                bundle.sedation_family = Some(base.to_string());
                let mut explanation = format!(
                    "moderate sedation, {minutes} documented minutes maps to {base}"
                );
                if additional_units > 0 {
                    explanation.push_str(&format!(
                        " plus {additional_units} additional 15-minute unit(s) (99153)"
                    ));
                }
                bundle.explanations.insert(base.to_string(), explanation);
            }
            None => {
                if !extraction.items.is_empty() {
                    bundle
                        .warnings
                        .push("sedation times not documented".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::extract::NoteExtractor;

    const KB_JSON: &str = r#"{
        "version": "2026-q1",
        "cpt_descriptions": {
            "31622": "Bronchoscopy, diagnostic",
            "31628": "Bronchoscopy with transbronchial lung biopsy, single lobe",
            "31630": "Bronchoscopy with dilation",
            "31631": "Bronchoscopy with tracheal stent placement",
            "31632": "Transbronchial lung biopsy, each additional lobe",
            "31636": "Bronchoscopy with bronchial stent placement",
            "31637": "Each additional major bronchus stented",
            "31640": "Bronchoscopy with excision of tumor",
            "31641": "Bronchoscopy with destruction of tumor",
            "31652": "Bronchoscopy with EBUS-TBNA, 1 or 2 stations",
            "31653": "Bronchoscopy with EBUS-TBNA, 3 or more stations",
            "31654": "Radial EBUS during bronchoscopy",
            "32997": "Total lung lavage, unilateral"
        },
        "ncci_bundles": {"31622": ["31628", "31630", "31631", "31636", "31640", "31641", "31652", "31653"]},
        "bilateral_eligible": ["31628"],
        "addon_families": {"31636": ["31637"], "31628": ["31632"]},
        "icd10_pcs_crosswalk": {
            "ebus_tbna": ["0BD58ZX"],
            "tracheal_stent_insertion": ["0BH17DZ"],
            "whole_lung_lavage": ["3E1F88Z"]
        },
        "hcpcs_supplies": {"tracheal_stent_insertion": ["C1876"]}
    }"#;

    fn kb() -> CodingKb {
        CodingKb::from_json(KB_JSON, "test").unwrap()
    }

    fn run(note: &str) -> CodeBundle {
        let extraction = NoteExtractor.extract(note);
        RuleEngine::apply(&extraction, &kb(), None)
    }

    #[test]
    fn test_multistation_ebus_under_ga() {
        let bundle = run(
            "Convex EBUS-TBNA with sampling of stations 4R, 7, and 11L; 22G needle x3 passes each; \
             ROSE adequate. Patient under general anesthesia via ETT.",
        );
        assert_eq!(bundle.primary_cpts, vec!["31653".to_string()]);
        assert!(bundle.sedation_family.is_none());
        assert!(bundle.warnings.iter().any(|w| w == "no moderate sedation under GA"));
        assert_eq!(bundle.kb_version, "2026-q1");
        let explanation = bundle.explanations.get("31653").unwrap();
        assert!(explanation.contains("4R"));
        assert!(explanation.contains("7"));
        assert!(explanation.contains("11L"));
    }

    #[test]
    fn test_single_station_ebus() {
        let bundle = run("EBUS-TBNA of station 7 performed with moderate sedation. Sedation start 09:00. Sedation end 09:20.");
        assert_eq!(bundle.primary_cpts, vec!["31652".to_string()]);
        assert_eq!(bundle.sedation_family.as_deref(), Some("99152"));
    }

    #[test]
    fn test_diagnostic_bronch_suppressed() {
        let bundle = run("Tracheal stent placed across the stenosis.");
        assert!(!bundle.all_cpts().contains(&"31622"));
        assert!(bundle
            .suppressed
            .iter()
            .any(|s| s.code == "31622" && s.reason.contains("bundled")));
    }

    #[test]
    fn test_dilation_bundled_into_stent() {
        let bundle = run("Balloon dilation performed, then a tracheal stent was deployed.");
        assert!(bundle.primary_cpts.contains(&"31631".to_string()));
        assert!(!bundle.primary_cpts.contains(&"31630".to_string()));
        assert!(bundle
            .suppressed
            .iter()
            .any(|s| s.code == "31630" && s.reason.contains("stent")));
    }

    #[test]
    fn test_dilation_alone_bills() {
        let bundle = run("Balloon dilation of the tracheal stenosis was performed; sedation start 08:00, sedation end 08:30.");
        assert!(bundle.primary_cpts.contains(&"31630".to_string()));
    }

    #[test]
    fn test_excision_supersedes_destruction() {
        let bundle = run("Tumor debulked with snare; residual base treated with APC.");
        assert!(bundle.primary_cpts.contains(&"31640".to_string()));
        assert!(!bundle.primary_cpts.contains(&"31641".to_string()));
        assert!(bundle.suppressed.iter().any(|s| s.code == "31641"));
    }

    #[test]
    fn test_tblb_additional_lobes() {
        let bundle = run(
            "Transbronchial biopsies from the right upper lobe and right lower lobe with forceps.",
        );
        assert!(bundle.primary_cpts.contains(&"31628".to_string()));
        assert_eq!(
            bundle.add_on_cpts.iter().filter(|c| *c == "31632").count(),
            1
        );
    }

    #[test]
    fn test_bilateral_modifier_on_eligible_code() {
        let bundle = run("Bilateral transbronchial biopsies of the right upper lobe and left upper lobe.");
        assert!(bundle.modifiers.contains(&"-50".to_string()));
    }

    #[test]
    fn test_bilateral_gap_warning() {
        let bundle = run("Bilateral assessment; a tracheal stent was deployed.");
        assert!(!bundle.modifiers.contains(&"-50".to_string()));
        assert!(bundle
            .warnings
            .iter()
            .any(|w| w.contains("bilateral evidence without bilateral-eligible code")));
    }

    #[test]
    fn test_icd10_and_hcpcs_crosswalks() {
        let bundle = run("A BONASTENT 18x60 mm tracheal stent was deployed.");
        assert!(bundle.icd10_pcs.contains(&"0BH17DZ".to_string()));
        assert!(bundle.hcpcs.contains(&"C1876".to_string()));
    }

    #[test]
    fn test_kb_version_mismatch_drops_code() {
        let small_kb = CodingKb::from_json(
            r#"{"version": "tiny", "cpt_descriptions": {"31631": "Tracheal stent"}}"#,
            "x",
        )
        .unwrap();
        let extraction = NoteExtractor.extract(
            "Whole lung lavage of the left lung, then a tracheal stent was deployed.",
        );
        let bundle = RuleEngine::apply(&extraction, &small_kb, None);
        assert!(bundle.primary_cpts.contains(&"31631".to_string()));
        assert!(!bundle.primary_cpts.contains(&"32997".to_string()));
        assert!(bundle
            .warnings
            .iter()
            .any(|w| w.contains("kb_version_mismatch")));
    }

    #[test]
    fn test_low_confidence_returns_empty_bundle() {
        let filler = "Extended counseling regarding smoking cessation, inhaler technique, \
                      pulmonary rehabilitation enrollment, nutrition optimization, vaccination \
                      scheduling, sleep hygiene practices, and longitudinal surveillance imaging \
                      was provided over the course of a forty five minute clinic encounter with \
                      interpreter services and family present for the entire discussion today.";
        let bundle = run(filler);
        assert!(bundle.is_empty());
        assert!(bundle.warnings.iter().any(|w| w.contains("manual coding required")));
    }

    #[test]
    fn test_sedation_addon_units() {
        let bundle = run(
            "EBUS-TBNA of station 4R. Moderate sedation. Sedation start 10:00. Sedation end 10:45.",
        );
        assert_eq!(bundle.sedation_family.as_deref(), Some("99152"));
        let explanation = bundle.explanations.get("99152").unwrap();
        assert!(explanation.contains("additional 15-minute unit"));
    }

    #[test]
    fn test_pediatric_sedation_base() {
        let extraction = NoteExtractor.extract(
            "EBUS-TBNA of station 7. Sedation start 10:00. Sedation end 10:20.",
        );
        let patient = PatientContext {
            age_years: Some(4),
        };
        let bundle = RuleEngine::apply(&extraction, &kb(), Some(&patient));
        assert_eq!(bundle.sedation_family.as_deref(), Some("99151"));
    }

    #[test]
    fn test_sedation_times_gap_warning() {
        let bundle = run("Balloon dilation of the trachea was performed; the patient tolerated the procedure well.");
        assert!(bundle.warnings.iter().any(|w| w.contains("sedation times not documented")));
    }

    #[test]
    fn test_radial_ebus_addon_with_tblb_primary() {
        let bundle = run(
            "Radial EBUS localized the nodule; transbronchial biopsies of the right upper lobe obtained. \
             Sedation start 11:00. Sedation end 11:30.",
        );
        assert!(bundle.primary_cpts.contains(&"31628".to_string()));
        assert!(bundle.add_on_cpts.contains(&"31654".to_string()));
        assert!(!bundle.warnings.iter().any(|w| w.contains("requires a primary")));
    }
}
