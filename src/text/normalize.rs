//! Boundary text normalization.
//!
//! Source documents arrive with PDF extraction artifacts: ligature glyphs,
//! typographic quotes and dashes, duplicated parenthetical expansions
//! ("tracheoesophageal fistula (tracheoesophageal fistula)"), and ragged
//! whitespace. This pass runs at every text boundary and is idempotent.

use unicode_segmentation::UnicodeSegmentation;

/// Replaces ligature glyphs and typographic punctuation with ASCII
/// equivalents.
fn fold_unicode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            'ﬁ' => out.push_str("fi"),
            'ﬂ' => out.push_str("fl"),
            'ﬀ' => out.push_str("ff"),
            'ﬃ' => out.push_str("ffi"),
            'ﬄ' => out.push_str("ffl"),
            'ﬅ' => out.push_str("ft"),
            'ﬆ' => out.push_str("st"),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

/// Collapses a parenthetical that merely repeats the words before it.
///
/// "whole lung lavage (whole lung lavage)" becomes "whole lung lavage".
/// Comparison is case-insensitive on word boundaries.
fn collapse_double_expansions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('(') {
        let Some(close_rel) = rest[open..].find(')') else {
            break;
        };
        let close = open + close_rel;
        let inner = rest[open + 1..close].trim();
        let before = &rest[..open];

        let inner_words: Vec<String> = inner
            .unicode_words()
            .map(str::to_lowercase)
            .collect();
        let before_words: Vec<String> = before
            .unicode_words()
            .map(str::to_lowercase)
            .collect();

        let duplicated = !inner_words.is_empty()
            && before_words.len() >= inner_words.len()
            && before_words[before_words.len() - inner_words.len()..] == inner_words[..];

        if duplicated {
            out.push_str(before.trim_end());
            rest = &rest[close + 1..];
        } else {
            out.push_str(&rest[..close + 1]);
            rest = &rest[close + 1..];
        }
    }
    out.push_str(rest);
    out
}

/// Normalizes text at a system boundary.
///
/// Folds unicode artifacts, removes duplicated parenthetical expansions,
/// and collapses all whitespace runs to single spaces.
///
/// Idempotent: `normalize_text(normalize_text(x)) == normalize_text(x)`.
///
/// # Examples
///
/// ```
/// use ip_assist::text::normalize_text;
///
/// assert_eq!(normalize_text("ﬁducial  marker"), "fiducial marker");
/// assert_eq!(
///     normalize_text("whole lung lavage (whole lung lavage) protocol"),
///     "whole lung lavage protocol"
/// );
/// ```
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let folded = fold_unicode(text);
    let collapsed = collapse_double_expansions(&folded);
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ")
}
