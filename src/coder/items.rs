//! Performed-procedure records extracted from an operative note.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Closed set of extractable procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureId {
    /// Bronchoscopic tumor excision (snare, polypectomy, specimen sent).
    TumorExcisionBronchoscopic,
    /// Bronchoscopic tumor destruction (APC, laser, cryo destruction).
    TumorDestructionBronchoscopic,
    /// Tracheal stent insertion (Y-stents count as tracheal).
    TrachealStentInsertion,
    /// Bronchial stent insertion.
    BronchialStentInsertion,
    /// Airway dilation performed on its own.
    AirwayDilationOnly,
    /// Whole lung lavage.
    WholeLungLavage,
    /// Convex EBUS with transbronchial needle aspiration.
    EbusTbna,
    /// EBUS without needle sampling (radial probe survey).
    EbusWithoutTbna,
    /// Transbronchial lung biopsy, forceps or cryoprobe.
    TblbForcepsOrCryo,
}

impl ProcedureId {
    /// Returns the string representation used in KB crosswalk keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TumorExcisionBronchoscopic => "tumor_excision_bronchoscopic",
            Self::TumorDestructionBronchoscopic => "tumor_destruction_bronchoscopic",
            Self::TrachealStentInsertion => "tracheal_stent_insertion",
            Self::BronchialStentInsertion => "bronchial_stent_insertion",
            Self::AirwayDilationOnly => "airway_dilation_only",
            Self::WholeLungLavage => "whole_lung_lavage",
            Self::EbusTbna => "ebus_tbna",
            Self::EbusWithoutTbna => "ebus_without_tbna",
            Self::TblbForcepsOrCryo => "tblb_forceps_or_cryo",
        }
    }
}

impl std::fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anatomic site of a performed procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    /// Trachea.
    Trachea,
    /// Mainstem or lobar bronchus.
    Bronchus,
    /// A named lobe.
    Lobe,
    /// Site not documented.
    #[default]
    Unknown,
}

/// One procedure the note documents as performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformedItem {
    /// Which procedure.
    pub id: ProcedureId,
    /// Where it was performed.
    pub site: Site,
    /// Free-form extracted details (brand, size, needle gauge).
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    /// How many times (stents placed, lobes biopsied).
    pub count: usize,
    /// Whether tissue was collected.
    pub specimens_collected: bool,
    /// Unique sampled stations, for EBUS-TBNA (e.g. 4R, 7, 11L).
    #[serde(default)]
    pub stations: BTreeSet<String>,
    /// Biopsied lobes in order of appearance, for TBLB.
    #[serde(default)]
    pub lobes: Vec<String>,
    /// Note spans that produced this item, for the explainer.
    #[serde(default)]
    pub matched_spans: Vec<String>,
}

impl PerformedItem {
    /// Creates an item with the given id and site, count 1.
    #[must_use]
    pub fn new(id: ProcedureId, site: Site) -> Self {
        Self {
            id,
            site,
            details: BTreeMap::new(),
            count: 1,
            specimens_collected: false,
            stations: BTreeSet::new(),
            lobes: Vec::new(),
            matched_spans: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_id_serde_names() {
        let json = serde_json::to_string(&ProcedureId::EbusTbna).unwrap();
        assert_eq!(json, "\"ebus_tbna\"");
        let id: ProcedureId = serde_json::from_str("\"whole_lung_lavage\"").unwrap();
        assert_eq!(id, ProcedureId::WholeLungLavage);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for id in [
            ProcedureId::TumorExcisionBronchoscopic,
            ProcedureId::TrachealStentInsertion,
            ProcedureId::TblbForcepsOrCryo,
        ] {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn test_new_item_defaults() {
        let item = PerformedItem::new(ProcedureId::AirwayDilationOnly, Site::Trachea);
        assert_eq!(item.count, 1);
        assert!(!item.specimens_collected);
        assert!(item.stations.is_empty());
    }
}
