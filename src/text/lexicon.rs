//! Medical lexicon and abbreviation dictionary.
//!
//! The abbreviation table covers the short forms clinicians actually type.
//! The lexicon is built from the corpus at startup and backs the fuzzy
//! typo correction in the query normalizer: a token is only corrected to a
//! term the corpus supports with at least [`MIN_CHUNK_SUPPORT`] chunks.

use std::collections::HashMap;

use crate::core::Chunk;

/// Minimum number of chunks that must mention a term before the fuzzy
/// corrector may rewrite a query token to it.
pub const MIN_CHUNK_SUPPORT: usize = 3;

/// Curated abbreviation dictionary, lowercase short form to long form.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("apc", "argon plasma coagulation"),
    ("blvr", "bronchoscopic lung volume reduction"),
    ("cao", "central airway obstruction"),
    ("ebus", "endobronchial ultrasound"),
    ("emn", "electromagnetic navigation"),
    ("ett", "endotracheal tube"),
    ("ga", "general anesthesia"),
    ("lma", "laryngeal mask airway"),
    ("nsclc", "non-small cell lung cancer"),
    ("pdt", "percutaneous dilational tracheostomy"),
    ("rose", "rapid on-site evaluation"),
    ("sems", "self-expanding metal stent"),
    ("tbna", "transbronchial needle aspiration"),
    ("tblb", "transbronchial lung biopsy"),
    ("tef", "tracheoesophageal fistula"),
    ("wll", "whole lung lavage"),
];

/// Looks up the long form for a lowercase abbreviation.
#[must_use]
pub fn expand_abbreviation(short: &str) -> Option<&'static str> {
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == short)
        .map(|(_, long)| *long)
}

/// Corpus-backed term lexicon with per-term chunk support counts.
#[derive(Debug, Default)]
pub struct MedicalLexicon {
    support: HashMap<String, usize>,
}

impl MedicalLexicon {
    /// Builds the lexicon from the chunk corpus.
    ///
    /// Counts, for every alphabetic token of at least five characters and
    /// every declared alias, the number of distinct chunks mentioning it.
    #[must_use]
    pub fn from_corpus<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut support: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
            for token in chunk.text.split_whitespace() {
                let word: String = token
                    .chars()
                    .filter(|c| c.is_alphabetic())
                    .flat_map(char::to_lowercase)
                    .collect();
                if word.len() >= 5 {
                    seen.insert(word);
                }
            }
            for alias in &chunk.aliases {
                for word in alias.split_whitespace() {
                    if word.len() >= 5 {
                        seen.insert(word.to_lowercase());
                    }
                }
            }
            for word in seen {
                *support.entry(word).or_insert(0) += 1;
            }
        }
        Self { support }
    }

    /// Number of chunks supporting a term.
    #[must_use]
    pub fn support(&self, term: &str) -> usize {
        self.support.get(term).copied().unwrap_or(0)
    }

    /// Returns `true` if the term is an exact lexicon entry with enough
    /// corpus support to anchor a correction.
    #[must_use]
    pub fn contains(&self, term: &str) -> bool {
        self.support(term) >= MIN_CHUNK_SUPPORT
    }

    /// Attempts to correct a misspelled token against the lexicon.
    ///
    /// Only corrects when the token is at least five characters, the best
    /// candidate is within edit distance 2, the match is unambiguous, and
    /// the candidate has at least [`MIN_CHUNK_SUPPORT`] supporting chunks.
    #[must_use]
    pub fn correct(&self, word: &str) -> Option<String> {
        if word.len() < 5 || self.contains(word) {
            return None;
        }

        let mut best: Option<&str> = None;
        let mut best_distance = 3usize;
        let mut ambiguous = false;

        for (term, &count) in &self.support {
            if count < MIN_CHUNK_SUPPORT {
                continue;
            }
            // Length prefilter: terms differing by more than 2 chars cannot
            // be within distance 2.
            if word.len().abs_diff(term.len()) > 2 {
                continue;
            }
            let dist = edit_distance(word, term);
            if dist < best_distance {
                best_distance = dist;
                best = Some(term);
                ambiguous = false;
            } else if dist == best_distance && best.is_some_and(|b| b != term.as_str()) {
                ambiguous = true;
            }
        }

        match best {
            Some(term) if !ambiguous && best_distance <= 2 => Some(term.to_string()),
            _ => None,
        }
    }
}

/// Levenshtein edit distance over chars.
#[must_use]
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, &ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}
