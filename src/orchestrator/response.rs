//! Request and response records of the query path.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{Citation, QueryClass, SearchFilters};

static LEFTOVER_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\[chunk:[A-Za-z0-9_\-]+\]").unwrap()
});

/// A query-path request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerRequest {
    /// Free-text clinical question.
    pub query: String,
    /// Desired result count; defaults from configuration.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Whether the reranker runs; defaults from configuration.
    #[serde(default)]
    pub use_reranker: Option<bool>,
    /// Session to thread conversation history through.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Caller-supplied post-filters; class-derived filters fill the gaps.
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    /// Optional synthesis model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// The response bundle of the query path.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerBundle {
    /// Synthesized answer as HTML (or the evidence-only rendering).
    pub answer_html: String,
    /// Resolved citations, visible and hidden.
    pub citations: Vec<Citation>,
    /// Whether the emergency fast path answered.
    pub is_emergency: bool,
    /// Confidence in [0,1], derived from the top retrieval scores.
    pub confidence: f64,
    /// Query classification.
    pub classification: QueryClass,
    /// Safety warnings (pre- and post-check, contraindication highlights).
    pub safety_warnings: Vec<String>,
    /// Chunk ids that grounded the answer, in rank order.
    pub grounding_chunks: Vec<String>,
    /// Coding KB version, populated on the coding path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kb_version: Option<String>,
    /// True when the post-check flagged the draft for human review.
    pub review_required: bool,
    /// Degradation and processing warnings.
    pub warnings: Vec<String>,
}

/// Renders a draft with `[chunk:<id>]` markers into HTML.
///
/// Visible citations become bracketed reference numbers; hidden ones are
/// removed. A numbered reference list of visible citations is appended.
#[must_use]
pub fn render_answer_html(draft: &str, citations: &[Citation]) -> String {
    let mut text = draft.to_string();
    for citation in citations {
        let marker = format!("[chunk:{}]", citation.chunk_id);
        let replacement = citation
            .number
            .map_or_else(String::new, |n| format!("[{n}]"));
        text = text.replace(&marker, &replacement);
    }
    // Markers whose chunk deduplicated into another document's citation
    // carry no replacement of their own.
    let text = LEFTOVER_MARKER_RE.replace_all(&text, "").into_owned();

    let mut html = String::with_capacity(text.len() + 256);
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() {
            html.push_str("<p>");
            html.push_str(&escape_html(paragraph));
            html.push_str("</p>\n");
        }
    }

    let visible: Vec<&Citation> = citations.iter().filter(|c| c.visible).collect();
    if !visible.is_empty() {
        html.push_str("<ol class=\"references\">\n");
        for citation in visible {
            html.push_str(&format!(
                "<li>{} ({}). {}. {}.</li>\n",
                escape_html(&citation.authors),
                citation.year,
                escape_html(&citation.title),
                escape_html(&citation.venue),
            ));
        }
        html.push_str("</ol>\n");
    }
    html
}

/// Minimal HTML escaping for text content.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(chunk_id: &str, number: Option<usize>, visible: bool) -> Citation {
        Citation {
            number,
            chunk_id: chunk_id.to_string(),
            doc_id: format!("doc_{chunk_id}"),
            authors: "Ost D".to_string(),
            year: 2023,
            title: "Title".to_string(),
            venue: "Chest".to_string(),
            visible,
        }
    }

    #[test]
    fn test_render_replaces_visible_markers() {
        let html = render_answer_html(
            "Stents work [chunk:c1].",
            &[citation("c1", Some(1), true)],
        );
        assert!(html.contains("Stents work [1]."));
        assert!(html.contains("<ol class=\"references\">"));
        assert!(html.contains("Ost D (2023)"));
    }

    #[test]
    fn test_render_strips_hidden_markers() {
        let html = render_answer_html(
            "Grounded claim [chunk:c1].",
            &[citation("c1", None, false)],
        );
        assert!(html.contains("Grounded claim ."));
        assert!(!html.contains("references"));
    }

    #[test]
    fn test_render_escapes_html() {
        let html = render_answer_html("dose <40 mg & more", &[]);
        assert!(html.contains("&lt;40 mg &amp; more"));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: AnswerRequest =
            serde_json::from_str(r#"{"query": "fiducial markers"}"#).unwrap();
        assert_eq!(request.query, "fiducial markers");
        assert!(request.top_k.is_none());
        assert!(request.session_id.is_none());
    }
}
