//! Operative-note extraction.
//!
//! An ordered battery of regexes with named capture groups runs over a
//! lightly normalized note and emits [`PerformedItem`]s. The patterns
//! capture procedure and device vocabulary only, never identifiers, so
//! extraction is safe on de-identified and identified notes alike.
//!
//! Every match is subject to the negative-mention guard: a match inside an
//! 8-token window containing refusal or deferral language is dropped.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::text::normalize_text;

use super::items::{PerformedItem, ProcedureId, Site};

/// Notes longer than this with no pattern hits are flagged low-confidence.
const LOW_CONFIDENCE_TOKEN_FLOOR: usize = 50;

/// Tokens inspected on each side of a match by the negative-mention guard.
const NEGATION_WINDOW: usize = 8;

/// Wider window used when harvesting details (brand, size) around a match.
const DETAIL_WINDOW: usize = 12;

#[allow(clippy::unwrap_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static STENT_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\by[-\s]?stent\b|\bstents?\b"));
static STENT_BRAND_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?P<brand>bonastent|aero|ultraflex|dumon|polyflex|hood|nitis|taewoong)\b"));
static STENT_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?P<d>\d{1,2}(?:\.\d)?)\s*(?:x|\u{d7})\s*(?P<l>\d{1,3})\s*mm\b"));
static PLACEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:placed|deployed|inserted|advanced|positioned)\b"));
static DILATION_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:balloon\s+)?dilat(?:ion|ed|ation)\b"));
static EXCISION_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bsnare\b|\bpolypectomy\b|\btransected\b"));
static SPECIMEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bspecimens?\s+(?:sent|collected|obtained|retrieved)\b|\bsent\s+(?:to|for)\s+pathology\b")
});
static TUMOR_CONTEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:tumou?r|mass|lesion|polyp)\b"));
static DESTRUCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bapc\b|\bargon\s+plasma\b|\blaser\b|\bcryo\s?-?\s?(?:destruction|ablation|therapy)\b|\belectrocautery\b")
});
static WLL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bwhole\s+lung\s+lavage\b|\bwll\b|\bdouble[-\s]lumen\s+lavage\b"));
static EBUS_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bebus\b"));
static RADIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bradial(?:\s+probe)?\s+ebus\b|\br-?ebus\b"));
static TBNA_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\btbna\b|\bneedle\s+aspiration\b|\btransbronchial\s+needle\b"));
static NEEDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?P<gauge>\d{2})\s?(?:g|gauge)\s+needle\b"));
static PASSES_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bx\s?(?P<n>\d+)\s+passes\b"));
static ROSE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\brose\s+(?P<verdict>adequate|inadequate|positive|negative)\b"));
static STATION_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bstations?\s+(?P<list>(?:\d{1,2}\s?[RL]?)(?:[\s,]+(?:and\s+)?\d{1,2}\s?[RL]?)*)")
});
static STATION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?P<num>\d{1,2})\s?(?P<side>[RLrl])?"));
static TBLB_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\btransbronchial\s+(?:lung\s+)?biops(?:y|ies)\b|\btblb\b|\bcryobiops(?:y|ies)\b")
});
static LOBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:right\s+(?:upper|middle|lower)\s+lobe|left\s+(?:upper|lower)\s+lobe|RUL|RML|RLL|LUL|LLL|lingula)\b")
});
static GA_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bgeneral\s+an(?:e|ae)sthesia\b|\bGA\b|\bLMA\b|\bETT\b|\bendotracheal\s+tube\b|\bmuscle\s+relaxants?\b|\bparalytics?\b|\brocuronium\b")
});
static MODERATE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bmoderate\s+sedation\b|\bconscious\s+sedation\b"));
static SEDATION_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bsedation\s+(?:start(?:ed)?|began|begun|initiated)(?:\s*(?:at|:))?\s*(?P<h>\d{1,2}):(?P<m>\d{2})")
});
static SEDATION_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bsedation\s+(?:end(?:ed)?|stop(?:ped)?|completed|concluded)(?:\s*(?:at|:))?\s*(?P<h>\d{1,2}):(?P<m>\d{2})")
});
static BILATERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bbilateral(?:ly)?\b|\bboth\s+(?:lungs|sides|mainstem\s+bronchi)\b"));

const NEGATION_WORDS: &[&str] = &["no", "declined", "considered", "deferred", "reluctant"];

/// Bare "not" is too broad ("could not advance past the tumor"); only the
/// full phrase negates a device mention.
const NEGATION_PHRASE: (&str, &str) = ("not", "placed");

/// Anesthesia and sedation context extracted from the note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SedationContext {
    /// General anesthesia indicators present (GA, LMA, ETT, relaxants).
    pub general_anesthesia: bool,
    /// The indicator spans that fired.
    pub ga_indicators: Vec<String>,
    /// Moderate or conscious sedation explicitly documented.
    pub moderate_documented: bool,
    /// Sedation minutes computed from documented start/end times.
    pub minutes: Option<u32>,
}

/// Everything extraction produced from one note.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Performed procedures, in battery order.
    pub items: Vec<PerformedItem>,
    /// Sedation context.
    pub sedation: SedationContext,
    /// Bilateral evidence anywhere in the note.
    pub bilateral: bool,
    /// No pattern fired on a substantial note.
    pub low_confidence: bool,
    /// Whitespace token count of the normalized note.
    pub note_tokens: usize,
}

/// The pattern-based note extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoteExtractor;

impl NoteExtractor {
    /// Runs the full battery over a note.
    #[must_use]
    pub fn extract(&self, note: &str) -> Extraction {
        let note = normalize_text(note);
        let mut extraction = Extraction {
            note_tokens: note.split_whitespace().count(),
            ..Extraction::default()
        };

        self.extract_stents(&note, &mut extraction);
        self.extract_dilation(&note, &mut extraction);
        self.extract_tumor_therapy(&note, &mut extraction);
        self.extract_lavage(&note, &mut extraction);
        self.extract_ebus(&note, &mut extraction);
        self.extract_tblb(&note, &mut extraction);

        extraction.sedation = extract_sedation(&note);
        extraction.bilateral = BILATERAL_RE.is_match(&note);
        extraction.low_confidence =
            extraction.items.is_empty() && extraction.note_tokens > LOW_CONFIDENCE_TOKEN_FLOOR;

        extraction
    }

    fn extract_stents(&self, note: &str, extraction: &mut Extraction) {
        let mut tracheal: Option<PerformedItem> = None;
        let mut bronchial: Option<PerformedItem> = None;
        let mut bronchial_placements = 0usize;

        for m in STENT_RE.find_iter(note) {
            if negated(note, m.start(), m.end()) {
                continue;
            }
            let window = window_text_sized(note, m.start(), m.end(), DETAIL_WINDOW);
            let window_lower = window.to_lowercase();
            let is_y_stent = m.as_str().to_lowercase().starts_with('y');
            let placement = PLACEMENT_RE.is_match(&window);

            let target = if is_y_stent || window_lower.contains("trachea") {
                &mut tracheal
            } else {
                if window_lower.contains("bronch") && placement {
                    bronchial_placements += 1;
                }
                &mut bronchial
            };

            let item = target.get_or_insert_with(|| {
                let (id, site) = if is_y_stent || window_lower.contains("trachea") {
                    (ProcedureId::TrachealStentInsertion, Site::Trachea)
                } else if window_lower.contains("bronch") {
                    (ProcedureId::BronchialStentInsertion, Site::Bronchus)
                } else {
                    (ProcedureId::BronchialStentInsertion, Site::Unknown)
                };
                PerformedItem::new(id, site)
            });
            item.matched_spans.push(window.clone());
            if let Some(brand) = STENT_BRAND_RE.captures(&window) {
                if let Some(b) = brand.name("brand") {
                    item.details
                        .insert("brand".to_string(), b.as_str().to_string());
                }
            }
            if let Some(size) = STENT_SIZE_RE.captures(&window) {
                if let (Some(d), Some(l)) = (size.name("d"), size.name("l")) {
                    item.details.insert(
                        "size".to_string(),
                        format!("{}x{} mm", d.as_str(), l.as_str()),
                    );
                }
            }
        }

        if let Some(item) = tracheal {
            extraction.items.push(item);
        }
        if let Some(mut item) = bronchial {
            item.count = bronchial_placements.max(1);
            extraction.items.push(item);
        }
    }

    fn extract_dilation(&self, note: &str, extraction: &mut Extraction) {
        for m in DILATION_RE.find_iter(note) {
            if negated(note, m.start(), m.end()) {
                continue;
            }
            let window = window_text(note, m.start(), m.end());
            let site = if window.to_lowercase().contains("trachea") {
                Site::Trachea
            } else if window.to_lowercase().contains("bronch") {
                Site::Bronchus
            } else {
                Site::Unknown
            };
            let mut item = PerformedItem::new(ProcedureId::AirwayDilationOnly, site);
            item.matched_spans.push(window);
            extraction.items.push(item);
            return;
        }
    }

    fn extract_tumor_therapy(&self, note: &str, extraction: &mut Extraction) {
        let mut excision: Option<PerformedItem> = None;
        for m in EXCISION_RE.find_iter(note) {
            if negated(note, m.start(), m.end()) {
                continue;
            }
            let item = excision.get_or_insert_with(|| {
                PerformedItem::new(ProcedureId::TumorExcisionBronchoscopic, Site::Bronchus)
            });
            item.matched_spans.push(window_text(note, m.start(), m.end()));
        }

        // "specimen sent" counts as excision evidence only in tumor context.
        if excision.is_none()
            && let Some(m) = SPECIMEN_RE.find(note)
        {
            let window = window_text(note, m.start(), m.end());
            if TUMOR_CONTEXT_RE.is_match(&window) && !negated(note, m.start(), m.end()) {
                let mut item =
                    PerformedItem::new(ProcedureId::TumorExcisionBronchoscopic, Site::Bronchus);
                item.matched_spans.push(window);
                excision = Some(item);
            }
        }

        if let Some(item) = &mut excision {
            item.specimens_collected = SPECIMEN_RE.is_match(note);
        }

        let mut destruction: Option<PerformedItem> = None;
        for m in DESTRUCTION_RE.find_iter(note) {
            if negated(note, m.start(), m.end()) {
                continue;
            }
            let item = destruction.get_or_insert_with(|| {
                PerformedItem::new(ProcedureId::TumorDestructionBronchoscopic, Site::Bronchus)
            });
            item.matched_spans.push(window_text(note, m.start(), m.end()));
        }

        if let Some(item) = excision {
            extraction.items.push(item);
        }
        if let Some(item) = destruction {
            extraction.items.push(item);
        }
    }

    fn extract_lavage(&self, note: &str, extraction: &mut Extraction) {
        if let Some(m) = WLL_RE.find(note) {
            if negated(note, m.start(), m.end()) {
                return;
            }
            let mut item = PerformedItem::new(ProcedureId::WholeLungLavage, Site::Unknown);
            let window = window_text(note, m.start(), m.end());
            let window_lower = window.to_lowercase();
            if window_lower.contains("left") {
                item.details.insert("laterality".to_string(), "left".to_string());
            } else if window_lower.contains("right") {
                item.details.insert("laterality".to_string(), "right".to_string());
            }
            item.matched_spans.push(window);
            extraction.items.push(item);
        }
    }

    fn extract_ebus(&self, note: &str, extraction: &mut Extraction) {
        if !EBUS_RE.is_match(note) && !RADIAL_RE.is_match(note) {
            return;
        }
        let sampled = TBNA_RE.is_match(note);

        if sampled {
            let stations = parse_stations(note);
            let mut item = PerformedItem::new(ProcedureId::EbusTbna, Site::Bronchus);
            item.specimens_collected = true;
            item.count = stations.len().max(1);
            if let Some(m) = TBNA_RE.find(note) {
                item.matched_spans.push(window_text(note, m.start(), m.end()));
            }
            if let Some(cap) = NEEDLE_RE.captures(note)
                && let Some(gauge) = cap.name("gauge")
            {
                item.details
                    .insert("needle_gauge".to_string(), format!("{}G", gauge.as_str()));
            }
            if let Some(cap) = PASSES_RE.captures(note)
                && let Some(n) = cap.name("n")
            {
                item.details
                    .insert("passes_per_station".to_string(), n.as_str().to_string());
            }
            if let Some(cap) = ROSE_RE.captures(note)
                && let Some(verdict) = cap.name("verdict")
            {
                item.details
                    .insert("rose".to_string(), verdict.as_str().to_lowercase());
            }
            item.stations = stations;
            extraction.items.push(item);
        } else {
            let mut item = PerformedItem::new(ProcedureId::EbusWithoutTbna, Site::Bronchus);
            if RADIAL_RE.is_match(note) {
                item.details
                    .insert("probe".to_string(), "radial".to_string());
            }
            if let Some(m) = EBUS_RE.find(note) {
                item.matched_spans.push(window_text(note, m.start(), m.end()));
            }
            extraction.items.push(item);
        }
    }

    fn extract_tblb(&self, note: &str, extraction: &mut Extraction) {
        let Some(m) = TBLB_RE.find(note) else {
            return;
        };
        if negated(note, m.start(), m.end()) {
            return;
        }
        let mut item = PerformedItem::new(ProcedureId::TblbForcepsOrCryo, Site::Lobe);
        item.specimens_collected = true;
        item.matched_spans.push(window_text(note, m.start(), m.end()));

        let mut seen = BTreeSet::new();
        for lobe in LOBE_RE.find_iter(note) {
            let label = canonical_lobe(lobe.as_str());
            if seen.insert(label.clone()) {
                item.lobes.push(label);
            }
        }
        item.count = item.lobes.len().max(1);
        extraction.items.push(item);
    }
}

/// True when the match sits inside an 8-token window containing refusal or
/// deferral language ("no", "declined", "considered", "deferred",
/// "reluctant", or the phrase "not placed").
fn negated(note: &str, start: usize, end: usize) -> bool {
    let mut before: Vec<String> = note[..start]
        .split_whitespace()
        .rev()
        .take(NEGATION_WINDOW)
        .map(clean_token)
        .collect();
    before.reverse();
    let after: Vec<String> = note[end..]
        .split_whitespace()
        .take(NEGATION_WINDOW)
        .map(clean_token)
        .collect();
    // The before and after sides are checked separately so the phrase
    // check never pairs tokens that straddle the match itself.
    contains_negation(&before) || contains_negation(&after)
}

fn contains_negation(tokens: &[String]) -> bool {
    if tokens
        .iter()
        .any(|token| NEGATION_WORDS.contains(&token.as_str()))
    {
        return true;
    }
    tokens
        .windows(2)
        .any(|pair| pair[0] == NEGATION_PHRASE.0 && pair[1] == NEGATION_PHRASE.1)
}

fn clean_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// The match plus 8 tokens of context on each side.
fn window_text(note: &str, start: usize, end: usize) -> String {
    window_text_sized(note, start, end, NEGATION_WINDOW)
}

/// The match plus `tokens` tokens of context on each side.
fn window_text_sized(note: &str, start: usize, end: usize, tokens: usize) -> String {
    let before: Vec<&str> = note[..start].split_whitespace().rev().take(tokens).collect();
    let after: Vec<&str> = note[end..].split_whitespace().take(tokens).collect();

    let mut window = String::new();
    for token in before.iter().rev() {
        window.push_str(token);
        window.push(' ');
    }
    window.push_str(&note[start..end]);
    for token in &after {
        window.push(' ');
        window.push_str(token);
    }
    window
}

/// Parses sampled station labels (4R, 7, 11L) from every station list in
/// the note.
fn parse_stations(note: &str) -> BTreeSet<String> {
    let mut stations = BTreeSet::new();
    for cap in STATION_LIST_RE.captures_iter(note) {
        let Some(list) = cap.name("list") else {
            continue;
        };
        for token in STATION_TOKEN_RE.captures_iter(list.as_str()) {
            let Some(num) = token.name("num") else {
                continue;
            };
            let side = token
                .name("side")
                .map(|s| s.as_str().to_uppercase())
                .unwrap_or_default();
            stations.insert(format!("{}{side}", num.as_str()));
        }
    }
    stations
}

/// Canonical lobe label (RUL, RML, RLL, LUL, LLL, lingula).
fn canonical_lobe(raw: &str) -> String {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "right upper lobe" => "RUL".to_string(),
        "right middle lobe" => "RML".to_string(),
        "right lower lobe" => "RLL".to_string(),
        "left upper lobe" => "LUL".to_string(),
        "left lower lobe" => "LLL".to_string(),
        "lingula" => "lingula".to_string(),
        _ => raw.to_uppercase(),
    }
}

/// Extracts the sedation context.
fn extract_sedation(note: &str) -> SedationContext {
    let mut context = SedationContext {
        moderate_documented: MODERATE_RE.is_match(note),
        ..SedationContext::default()
    };

    for m in GA_RE.find_iter(note) {
        context.general_anesthesia = true;
        context.ga_indicators.push(m.as_str().to_string());
    }

    let start = SEDATION_START_RE.captures(note).and_then(parse_hhmm);
    let end = SEDATION_END_RE.captures(note).and_then(parse_hhmm);
    if let (Some(start), Some(end)) = (start, end) {
        let minutes = if end >= start {
            end - start
        } else {
            // Crossed midnight.
            end + 24 * 60 - start
        };
        context.minutes = Some(minutes);
    }

    context
}

fn parse_hhmm(cap: regex::Captures<'_>) -> Option<u32> {
    let hours: u32 = cap.name("h")?.as_str().parse().ok()?;
    let minutes: u32 = cap.name("m")?.as_str().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}
