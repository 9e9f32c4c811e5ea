//! The coding knowledge base.
//!
//! A JSON document with CPT descriptions, NCCI bundling pairs,
//! bilateral-eligible codes, add-on families, ICD-10-PCS crosswalks, and
//! HCPCS supply crosswalks. The version is the explicit `version` key when
//! present, else the file mtime, and stamps every [`super::CodeBundle`]
//! for traceability.
//!
//! Deployments historically carried two overlapping KB files; the loader
//! merges them with the primary winning every key conflict.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CodingError, IoError, Result};

/// Raw KB file layout.
#[derive(Debug, Clone, Default, Deserialize)]
struct KbFile {
    /// Explicit version; the file mtime is used when absent.
    #[serde(default)]
    version: Option<String>,
    /// CPT code to short description.
    #[serde(default)]
    cpt_descriptions: BTreeMap<String, String>,
    /// Component code to the codes that absorb it (A bundles into B).
    #[serde(default)]
    ncci_bundles: BTreeMap<String, BTreeSet<String>>,
    /// Codes eligible for modifier -50.
    #[serde(default)]
    bilateral_eligible: BTreeSet<String>,
    /// Primary code to its add-on codes.
    #[serde(default)]
    addon_families: BTreeMap<String, BTreeSet<String>>,
    /// Procedure id to ICD-10-PCS codes.
    #[serde(default)]
    icd10_pcs_crosswalk: BTreeMap<String, Vec<String>>,
    /// Procedure id to HCPCS supply codes.
    #[serde(default)]
    hcpcs_supplies: BTreeMap<String, Vec<String>>,
}

/// The merged, ready-to-query knowledge base.
#[derive(Debug, Clone, Default)]
pub struct CodingKb {
    version: String,
    cpt_descriptions: BTreeMap<String, String>,
    ncci_bundles: BTreeMap<String, BTreeSet<String>>,
    bilateral_eligible: BTreeSet<String>,
    addon_families: BTreeMap<String, BTreeSet<String>>,
    icd10_pcs_crosswalk: BTreeMap<String, Vec<String>>,
    hcpcs_supplies: BTreeMap<String, Vec<String>>,
}

impl CodingKb {
    /// Parses a KB from JSON, using `fallback_version` when the document
    /// carries no `version` key.
    ///
    /// # Errors
    ///
    /// Returns [`CodingError::KbParse`] on malformed JSON.
    pub fn from_json(payload: &str, fallback_version: &str) -> Result<Self> {
        let file: KbFile = serde_json::from_str(payload).map_err(CodingError::from)?;
        Ok(Self::from_file(file, fallback_version))
    }

    /// Loads a KB file; the version falls back to the file mtime.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                crate::error::Error::Coding(CodingError::KbNotFound {
                    path: path.to_string_lossy().to_string(),
                })
            } else {
                crate::error::Error::Io(IoError::ReadFailed {
                    path: path.to_string_lossy().to_string(),
                    reason: e.to_string(),
                })
            }
        })?;
        let mtime_version = file_mtime_version(path);
        Self::from_json(&payload, &mtime_version)
    }

    /// Loads and merges two KB files. On conflicting keys the primary
    /// wins and the discarded value is logged.
    ///
    /// # Errors
    ///
    /// Returns an error when either file is missing or malformed.
    pub fn load_with_fallback<P: AsRef<Path>>(primary: P, secondary: P) -> Result<Self> {
        let primary = Self::load(primary)?;
        let secondary = Self::load(secondary)?;
        Ok(primary.merged_over(secondary))
    }

    /// Merges `self` over a secondary KB; `self` wins conflicts.
    #[must_use]
    pub fn merged_over(mut self, secondary: Self) -> Self {
        for (code, description) in secondary.cpt_descriptions {
            if self.cpt_descriptions.contains_key(&code) {
                warn!(%code, "secondary KB description shadowed by primary");
            } else {
                self.cpt_descriptions.insert(code, description);
            }
        }
        for (code, absorbers) in secondary.ncci_bundles {
            self.ncci_bundles.entry(code).or_insert(absorbers);
        }
        self.bilateral_eligible.extend(secondary.bilateral_eligible);
        for (code, addons) in secondary.addon_families {
            self.addon_families.entry(code).or_insert(addons);
        }
        for (id, codes) in secondary.icd10_pcs_crosswalk {
            self.icd10_pcs_crosswalk.entry(id).or_insert(codes);
        }
        for (id, codes) in secondary.hcpcs_supplies {
            self.hcpcs_supplies.entry(id).or_insert(codes);
        }
        if !secondary.version.is_empty() && secondary.version != self.version {
            self.version = format!("{}+{}", self.version, secondary.version);
        }
        self
    }

    fn from_file(file: KbFile, fallback_version: &str) -> Self {
        Self {
            version: file
                .version
                .unwrap_or_else(|| fallback_version.to_string()),
            cpt_descriptions: file.cpt_descriptions,
            ncci_bundles: file.ncci_bundles,
            bilateral_eligible: file.bilateral_eligible,
            addon_families: file.addon_families,
            icd10_pcs_crosswalk: file.icd10_pcs_crosswalk,
            hcpcs_supplies: file.hcpcs_supplies,
        }
    }

    /// The KB version stamped on every bundle.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Description for a CPT code, when the KB knows it.
    #[must_use]
    pub fn describe(&self, code: &str) -> Option<&str> {
        self.cpt_descriptions.get(code).map(String::as_str)
    }

    /// True when the KB carries the code at all.
    #[must_use]
    pub fn knows(&self, code: &str) -> bool {
        self.cpt_descriptions.contains_key(code)
    }

    /// Codes that absorb this component code under NCCI edits.
    #[must_use]
    pub fn ncci_absorbers(&self, code: &str) -> Option<&BTreeSet<String>> {
        self.ncci_bundles.get(code)
    }

    /// True when the code may carry modifier -50.
    #[must_use]
    pub fn is_bilateral_eligible(&self, code: &str) -> bool {
        self.bilateral_eligible.contains(code)
    }

    /// Add-on codes belonging to a primary.
    #[must_use]
    pub fn addons_for(&self, primary: &str) -> Option<&BTreeSet<String>> {
        self.addon_families.get(primary)
    }

    /// Primary codes whose family claims the given add-on.
    #[must_use]
    pub fn primaries_for_addon(&self, addon: &str) -> Vec<&str> {
        self.addon_families
            .iter()
            .filter(|(_, addons)| addons.contains(addon))
            .map(|(primary, _)| primary.as_str())
            .collect()
    }

    /// ICD-10-PCS codes for a performed procedure.
    #[must_use]
    pub fn icd10_pcs_for(&self, procedure_id: &str) -> &[String] {
        self.icd10_pcs_crosswalk
            .get(procedure_id)
            .map_or(&[], Vec::as_slice)
    }

    /// HCPCS supply codes for a performed procedure.
    #[must_use]
    pub fn hcpcs_for(&self, procedure_id: &str) -> &[String] {
        self.hcpcs_supplies
            .get(procedure_id)
            .map_or(&[], Vec::as_slice)
    }
}

/// An mtime-derived version string (`mtime-<unix seconds>`).
fn file_mtime_version(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map_or_else(
            || "unversioned".to_string(),
            |d| format!("mtime-{}", d.as_secs()),
        )
}
