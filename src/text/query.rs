//! Query normalization: typo correction and abbreviation expansion.
//!
//! Runs once per request before classification and retrieval. The output
//! feeds every retrieval leg, so the pass is strictly idempotent:
//! `normalize(normalize(q)) == normalize(q)`.

use std::collections::BTreeMap;

use super::lexicon::{MedicalLexicon, expand_abbreviation};
use super::normalize::normalize_text;

/// A normalized query plus the abbreviation expansions that were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// The normalized query text.
    pub text: String,
    /// Short form to long form, for every expansion applied.
    pub expansions: BTreeMap<String, String>,
}

/// Query normalizer backed by the corpus lexicon.
pub struct QueryNormalizer {
    lexicon: MedicalLexicon,
}

impl QueryNormalizer {
    /// Creates a normalizer over a corpus-built lexicon.
    #[must_use]
    pub const fn new(lexicon: MedicalLexicon) -> Self {
        Self { lexicon }
    }

    /// Normalizes a raw user query.
    ///
    /// Lowercases, strips punctuation (preserving 5-digit CPT tokens,
    /// hyphens, parentheses, and decimal points), expands known
    /// abbreviations with their long form in parentheses, and corrects
    /// typos against the lexicon when the corpus supports the candidate.
    ///
    /// # Examples
    ///
    /// ```
    /// use ip_assist::text::{MedicalLexicon, QueryNormalizer};
    ///
    /// let normalizer = QueryNormalizer::new(MedicalLexicon::default());
    /// let out = normalizer.normalize("TEF repair, CPT 31630!");
    /// assert_eq!(out.text, "tef (tracheoesophageal fistula) repair cpt 31630");
    /// ```
    #[must_use]
    pub fn normalize(&self, raw: &str) -> NormalizedQuery {
        let lowered = normalize_text(raw).to_lowercase();
        let stripped = strip_punctuation(&lowered);

        let mut expansions = BTreeMap::new();
        let mut out_tokens: Vec<String> = Vec::new();

        for token in stripped.split_whitespace() {
            let (prefix, bare, suffix) = split_token(token);

            if let Some(long) = expand_abbreviation(bare) {
                // Idempotence: skip when the long form already appears
                // anywhere in the query (including a prior expansion).
                if stripped.contains(long) {
                    out_tokens.push(token.to_string());
                } else {
                    expansions.insert(bare.to_string(), long.to_string());
                    out_tokens.push(format!("{prefix}{bare} ({long}){suffix}"));
                }
                continue;
            }

            if is_cpt_token(bare) {
                out_tokens.push(token.to_string());
                continue;
            }

            if let Some(corrected) = self.lexicon.correct(bare) {
                // A correction may land on an abbreviation; expand it in
                // the same pass so the output is a fixed point.
                match expand_abbreviation(&corrected) {
                    Some(long) if !stripped.contains(long) => {
                        expansions.insert(corrected.clone(), long.to_string());
                        out_tokens.push(format!("{prefix}{corrected} ({long}){suffix}"));
                    }
                    _ => out_tokens.push(format!("{prefix}{corrected}{suffix}")),
                }
            } else {
                out_tokens.push(token.to_string());
            }
        }

        NormalizedQuery {
            text: out_tokens.join(" "),
            expansions,
        }
    }
}

/// Returns `true` for a 5-digit CPT-like token.
#[must_use]
pub fn is_cpt_token(token: &str) -> bool {
    token.len() == 5 && token.chars().all(|c| c.is_ascii_digit())
}

/// Strips punctuation, preserving characters that carry meaning downstream:
/// digits (CPT tokens), hyphens (y-stent), parentheses (expansions), and
/// decimal points between digits.
fn strip_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let keep = c.is_alphanumeric()
            || c.is_whitespace()
            || matches!(c, '-' | '(' | ')')
            || (c == '.'
                && i > 0
                && i + 1 < chars.len()
                && chars[i - 1].is_ascii_digit()
                && chars[i + 1].is_ascii_digit());
        if keep {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a token into leading parens, the bare word, and trailing parens.
fn split_token(token: &str) -> (&str, &str, &str) {
    let start = token.len() - token.trim_start_matches(['(', ')']).len();
    let trimmed = token.trim_end_matches(['(', ')']);
    let end = trimmed.len().max(start);
    (&token[..start], &token[start..end], &token[end..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AuthorityTier, Chunk, DocType, Domain, EvidenceLevel, SectionKind,
    };
    use std::collections::BTreeSet;

    fn corpus_lexicon() -> MedicalLexicon {
        let chunk = |id: &str| Chunk {
            chunk_id: id.to_string(),
            text: "rigid bronchoscopy for tracheal stenosis with balloon dilation".to_string(),
            doc_id: "d".to_string(),
            doc_type: DocType::BookChapter,
            section_title: "s".to_string(),
            section_kind: SectionKind::Procedure,
            year: 2024,
            authority_tier: AuthorityTier::A1,
            evidence_level: EvidenceLevel::H3,
            domain: Domain::Clinical,
            cpt_codes: BTreeSet::new(),
            aliases: BTreeSet::new(),
            tags: BTreeSet::new(),
        };
        let chunks: Vec<Chunk> = (0..3).map(|i| chunk(&format!("c{i}"))).collect();
        MedicalLexicon::from_corpus(chunks.iter())
    }

    fn normalizer() -> QueryNormalizer {
        QueryNormalizer::new(corpus_lexicon())
    }

    #[test]
    fn test_lowercase_and_strip() {
        let out = normalizer().normalize("Tracheal Stenosis?!");
        assert_eq!(out.text, "tracheal stenosis");
    }

    #[test]
    fn test_cpt_token_preserved() {
        let out = normalizer().normalize("code: 31622.");
        assert!(out.text.contains("31622"));
    }

    #[test]
    fn test_decimal_preserved() {
        let out = normalizer().normalize("markers 1.5-5 cm apart");
        assert!(out.text.contains("1.5-5"));
    }

    #[test]
    fn test_abbreviation_expansion() {
        let out = normalizer().normalize("SEMS for benign stenosis");
        assert_eq!(
            out.text,
            "sems (self-expanding metal stent) for benign stenosis"
        );
        assert_eq!(
            out.expansions.get("sems").map(String::as_str),
            Some("self-expanding metal stent")
        );
    }

    #[test]
    fn test_expansion_skipped_when_long_form_present() {
        let out = normalizer().normalize("EBUS endobronchial ultrasound staging");
        assert_eq!(out.text, "ebus endobronchial ultrasound staging");
        assert!(out.expansions.is_empty());
    }

    #[test]
    fn test_typo_corrected_with_support() {
        let out = normalizer().normalize("tracheal stenosiss");
        assert_eq!(out.text, "tracheal stenosis");
    }

    #[test]
    fn test_typo_left_alone_without_support() {
        let out = normalizer().normalize("xyzzyplugh");
        assert_eq!(out.text, "xyzzyplugh");
    }

    #[test]
    fn test_idempotent() {
        let normalizer = normalizer();
        let cases = [
            "TEF repair",
            "SEMS benign tracheal stenosis",
            "CPT 31622",
            "EBUS-TBNA stations 4R and 7",
            "balloon dilation, 1.5-5 cm",
        ];
        for case in cases {
            let once = normalizer.normalize(case);
            let twice = normalizer.normalize(&once.text);
            assert_eq!(twice.text, once.text, "not idempotent for {case:?}");
        }
    }
}
