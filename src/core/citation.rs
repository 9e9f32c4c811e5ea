//! Citation records and the resolved references returned to callers.

use serde::{Deserialize, Serialize};

use super::chunk::DocType;

/// Document-level bibliographic record from the ingestion citation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Author list in citation order.
    pub authors: Vec<String>,
    /// Publication year.
    pub year: i32,
    /// Document title.
    pub title: String,
    /// Journal, publisher, or book title.
    pub venue: String,
    /// Document type, which drives the visibility policy.
    pub doc_type: DocType,
}

impl CitationRecord {
    /// Formats the author list: first author plus "et al." beyond three.
    #[must_use]
    pub fn formatted_authors(&self) -> String {
        match self.authors.len() {
            0 => String::new(),
            1..=3 => self.authors.join(", "),
            _ => format!("{} et al.", self.authors[0]),
        }
    }
}

/// A resolved citation attached to an answer.
///
/// Invisible citations (textbook chapters by default policy) still ground
/// the answer and appear in `grounding_chunks`, but carry no reference
/// number and are omitted from the visible reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Reference number in order of first appearance; `None` when hidden.
    pub number: Option<usize>,
    /// Chunk the draft cited.
    pub chunk_id: String,
    /// Document the chunk belongs to.
    pub doc_id: String,
    /// Formatted author list.
    pub authors: String,
    /// Publication year.
    pub year: i32,
    /// Document title.
    pub title: String,
    /// Journal, publisher, or book title.
    pub venue: String,
    /// Whether this citation appears in the visible reference list.
    pub visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_authors_short_list() {
        let record = CitationRecord {
            authors: vec!["Ost D".to_string(), "Ernst A".to_string()],
            year: 2023,
            title: "t".to_string(),
            venue: "Chest".to_string(),
            doc_type: DocType::Guideline,
        };
        assert_eq!(record.formatted_authors(), "Ost D, Ernst A");
    }

    #[test]
    fn test_formatted_authors_et_al() {
        let record = CitationRecord {
            authors: vec![
                "Criner G".to_string(),
                "Eberhardt R".to_string(),
                "Fernandez-Bussy S".to_string(),
                "Gompelmann D".to_string(),
            ],
            year: 2020,
            title: "t".to_string(),
            venue: "AJRCCM".to_string(),
            doc_type: DocType::SystematicReview,
        };
        assert_eq!(record.formatted_authors(), "Criner G et al.");
    }

    #[test]
    fn test_formatted_authors_empty() {
        let record = CitationRecord {
            authors: Vec::new(),
            year: 2020,
            title: "t".to_string(),
            venue: "v".to_string(),
            doc_type: DocType::Case,
        };
        assert_eq!(record.formatted_authors(), "");
    }
}
