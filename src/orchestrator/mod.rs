//! The orchestration state machine.
//!
//! One request flows classify → set filters → retrieve → rerank? →
//! safety pre-check → synthesize → safety post-check, with a single
//! [`PipelineState`]-like record (the locals of [`Orchestrator::answer`])
//! threaded through the stages. The only branch that truly differs is the
//! emergency fast path, which skips reranking and synthesis entirely.
//! Component failures are converted to response warnings here; only
//! `retrieval unavailable` surfaces as a hard error.

mod cache;
mod classify;
mod response;
mod session;

pub use cache::{CacheKey, ResultCache};
pub use classify::classify;
pub use response::{AnswerBundle, AnswerRequest, render_answer_html};
pub use session::{Session, SessionStore};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::citation::CitationResolver;
use crate::coder::ProceduralCoder;
use crate::config::Config;
use crate::core::{
    AuthorityTier, Chunk, Citation, HistoryTurn, QueryClass, QueryContext, RetrievedHit,
};
use crate::error::{Error, Result, RetrievalError};
use crate::llm::{ChatMessage, GenerateRequest, LanguageModel, system_message, user_message};
use crate::safety::SafetyLayer;
use crate::search::{HybridRetriever, SearchRequest};
use crate::text::QueryNormalizer;

/// Maximum accepted query length in bytes.
const MAX_QUERY_LEN: usize = 10_000;

/// Token budget for the synthesis response.
const SYNTHESIS_MAX_TOKENS: u32 = 1_200;

/// The hierarchy-aware score reachable by a perfect hit; confidence is the
/// top-of-list mean normalized by this.
const MAX_FINAL_SCORE: f64 = 1.1;

/// System prompt for grounded synthesis.
const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a clinical reference assistant for \
interventional pulmonology. Answer only from the provided excerpts. Cite every \
claim inline with its [chunk:<id>] marker. Never state a dose, contraindication, \
or device size that the excerpts do not support. If the excerpts are insufficient, \
say so plainly.";

/// Canned emergency protocol preamble, rendered without synthesis.
const EMERGENCY_PROTOCOL_HEADER: &str = "EMERGENCY PROTOCOL: secure the airway, \
call for senior help and anesthesia support, place the patient bleeding-side down \
if hemoptysis is suspected, and prepare rigid bronchoscopy. The excerpts below are \
from the highest-authority sources and are shown without synthesis.";

/// The orchestrator: process-wide read-only components plus the result
/// cache and session registry.
pub struct Orchestrator {
    retriever: Arc<HybridRetriever>,
    normalizer: QueryNormalizer,
    safety: SafetyLayer,
    resolver: CitationResolver,
    llm: Option<Arc<dyn LanguageModel>>,
    coder: Option<Arc<ProceduralCoder>>,
    cache: ResultCache,
    sessions: SessionStore,
    config: Config,
}

impl Orchestrator {
    /// Creates an orchestrator without a synthesis model (evidence-only
    /// answers). Attach one with [`with_llm`](Self::with_llm).
    #[must_use]
    pub fn new(
        retriever: Arc<HybridRetriever>,
        normalizer: QueryNormalizer,
        safety: SafetyLayer,
        resolver: CitationResolver,
        config: Config,
    ) -> Self {
        let cache = ResultCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_sec),
        );
        let sessions = SessionStore::new(config.session_turns);
        Self {
            retriever,
            normalizer,
            safety,
            resolver,
            llm: None,
            coder: None,
            cache,
            sessions,
            config,
        }
    }

    /// Attaches the synthesis model.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attaches the procedural coder, whose KB version stamps
    /// coding-classed responses.
    #[must_use]
    pub fn with_coder(mut self, coder: Arc<ProceduralCoder>) -> Self {
        self.coder = Some(coder);
        self
    }

    /// Answers a clinical question.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for empty or oversized queries.
    /// - [`RetrievalError::Unavailable`] when both retrieval legs are
    ///   down; every other component failure degrades into warnings on
    ///   the returned bundle.
    #[allow(clippy::too_many_lines)]
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerBundle> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest {
                message: "query cannot be empty".to_string(),
            });
        }
        if request.query.len() > MAX_QUERY_LEN {
            return Err(Error::InvalidRequest {
                message: format!(
                    "query exceeds maximum length ({} bytes, max {MAX_QUERY_LEN})",
                    request.query.len()
                ),
            });
        }

        let started = Instant::now();

        // classify
        let normalized = self.normalizer.normalize(&request.query);
        let pre = self.safety.pre_check(&normalized.text);
        let mut class = classify(&normalized.text);
        if pre.is_emergency {
            class = QueryClass::Emergency;
        }
        let is_emergency = class == QueryClass::Emergency;
        let budget = Duration::from_millis(if is_emergency {
            self.config.budget.emergency_ms
        } else {
            self.config.budget.request_ms
        });

        // set_filters
        let mut filters = request.filters.clone().unwrap_or_default();
        let mut top_k = request.top_k.unwrap_or(self.config.retrieval.top_k);
        let mut use_reranker = request
            .use_reranker
            .unwrap_or(self.config.retrieval.reranker_enabled);
        match class {
            QueryClass::Emergency => {
                if filters.authority_tiers.is_none() {
                    filters.authority_tiers =
                        Some(BTreeSet::from([AuthorityTier::A1, AuthorityTier::A2]));
                }
                top_k = top_k.min(5);
                use_reranker = false;
            }
            QueryClass::Coding => {
                // The coding_billing preference is a scoring bonus in the
                // retriever, never a hard filter: an exact CPT match in a
                // clinical chunk must still surface.
            }
            QueryClass::Safety => {
                filters.require_safety_evidence = true;
            }
            QueryClass::Procedure | QueryClass::Clinical => {}
        }

        // The single per-request state record threaded through the
        // remaining stages.
        let conversation_history = match &request.session_id {
            Some(session_id) => self.sessions.history(session_id).await,
            None => Vec::new(),
        };
        let ctx = QueryContext {
            raw_text: request.query.clone(),
            normalized_text: normalized.text,
            classification: class,
            filters,
            top_k,
            use_reranker,
            session_id: request.session_id.clone(),
            conversation_history,
        };

        // cache
        let cache_key = CacheKey {
            query: ctx.normalized_text.clone(),
            filters: ctx.filters.clone(),
            use_reranker: ctx.use_reranker,
        };
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!(query = %ctx.normalized_text, "result cache hit");
            return Ok((*cached).clone());
        }

        // retrieve (+ rerank inside the retriever)
        let outcome = match self
            .retriever
            .search(SearchRequest {
                query: &ctx.normalized_text,
                class: ctx.classification,
                k: ctx.top_k,
                filters: &ctx.filters,
                use_reranker: ctx.use_reranker,
                dense_timeout: budget / 2,
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(Error::Retrieval(RetrievalError::EmptyCorpusForQuery)) => {
                return Ok(self.empty_evidence_bundle(class, &pre.warnings));
            }
            Err(e) => return Err(e),
        };

        let grounding: Vec<Arc<Chunk>> = outcome
            .hits
            .iter()
            .map(|hit| Arc::clone(&hit.chunk))
            .collect();
        let grounding_ids: Vec<String> = grounding
            .iter()
            .map(|chunk| chunk.chunk_id.clone())
            .collect();
        let confidence = confidence_from_hits(&outcome.hits);
        let mut warnings = outcome.warnings;
        let mut safety_warnings = pre.warnings;

        let kb_version = if class == QueryClass::Coding {
            self.coder.as_ref().map(|coder| coder.kb_version().to_string())
        } else {
            None
        };

        // safety_pre short-circuit: the emergency fast path answers from
        // the retrieved A1/A2 chunks without synthesis or reranking.
        if is_emergency {
            let citations = self.resolver.resolve("", &grounding);
            let answer_html = render_emergency_html(&outcome.hits, &citations);
            let bundle = AnswerBundle {
                answer_html,
                citations,
                is_emergency: true,
                confidence,
                classification: class,
                safety_warnings,
                grounding_chunks: grounding_ids,
                kb_version,
                review_required: false,
                warnings,
            };
            self.finish(&request, &cache_key, &bundle, "emergency protocol")
                .await;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "emergency fast path answered"
            );
            return Ok(bundle);
        }

        // synthesize
        let draft = self
            .synthesize(
                &ctx.normalized_text,
                &ctx.conversation_history,
                &outcome.hits,
                request.model.clone(),
                budget.saturating_sub(started.elapsed()),
                &mut warnings,
            )
            .await;

        // safety_post + citations
        let mut review_required = false;
        let (answer_html, citations) = if let Some(draft) = &draft {
            let post = self.safety.post_check(draft, &grounding, class);
            safety_warnings.extend(post.warnings);
            review_required = post.review_required;
            let citations = self.resolver.resolve(draft, &grounding);
            (render_answer_html(draft, &citations), citations)
        } else {
            let citations = self.resolver.resolve("", &grounding);
            (render_evidence_only_html(&outcome.hits, &citations), citations)
        };

        // Contraindication sentences in the grounding are always surfaced,
        // whatever the classification.
        safety_warnings.extend(self.safety.contraindication_highlights(&grounding));

        let bundle = AnswerBundle {
            answer_html,
            citations,
            is_emergency: false,
            confidence,
            classification: class,
            safety_warnings,
            grounding_chunks: grounding_ids,
            kb_version,
            review_required,
            warnings,
        };
        let summary = draft.unwrap_or_else(|| "evidence-only response".to_string());
        self.finish(&request, &cache_key, &bundle, &summary).await;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            class = %class,
            "request complete"
        );
        Ok(bundle)
    }

    /// Runs synthesis under the remaining budget; failures degrade to
    /// `None` with a warning.
    async fn synthesize(
        &self,
        query: &str,
        history: &[HistoryTurn],
        hits: &[RetrievedHit],
        model: Option<String>,
        remaining: Duration,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let Some(llm) = &self.llm else {
            warnings.push("llm unavailable: no synthesis model configured".to_string());
            return None;
        };

        let request = build_generate_request(query, history, hits, model);
        match tokio::time::timeout(remaining, llm.generate(&request)).await {
            Ok(Ok(response)) => Some(response.text),
            Ok(Err(e)) => {
                warn!(error = %e, "synthesis failed, returning evidence only");
                warnings.push(format!("llm unavailable: {e}"));
                None
            }
            Err(_) => {
                warn!(elapsed_ms = remaining.as_millis() as u64, "synthesis timed out");
                warnings.push(format!(
                    "llm timed out after {} ms; returning evidence only",
                    remaining.as_millis()
                ));
                None
            }
        }
    }

    /// Records the turn and populates the cache.
    async fn finish(
        &self,
        request: &AnswerRequest,
        cache_key: &CacheKey,
        bundle: &AnswerBundle,
        summary: &str,
    ) {
        if let Some(session_id) = &request.session_id {
            self.sessions
                .record_turn(session_id, request.query.clone(), summary.to_string())
                .await;
        }
        self.cache
            .insert(cache_key.clone(), Arc::new(bundle.clone()));
    }

    /// The empty-evidence response for queries no chunk survives.
    fn empty_evidence_bundle(&self, class: QueryClass, pre_warnings: &[String]) -> AnswerBundle {
        AnswerBundle {
            answer_html: "<p>No corpus evidence matched this query under the active \
                          filters. Consider relaxing the year range, authority tier, \
                          or section filters.</p>"
                .to_string(),
            citations: Vec::new(),
            is_emergency: false,
            confidence: 0.0,
            classification: class,
            safety_warnings: pre_warnings.to_vec(),
            grounding_chunks: Vec::new(),
            kb_version: None,
            review_required: false,
            warnings: vec!["no chunks matched the query filters".to_string()],
        }
    }
}

/// Confidence: mean of the top-3 final scores, normalized.
fn confidence_from_hits(hits: &[RetrievedHit]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let count = hits.len().min(3);
    #[allow(clippy::cast_precision_loss)]
    let mean = hits.iter().take(count).map(|h| h.final_score).sum::<f64>() / count as f64;
    (mean / MAX_FINAL_SCORE).clamp(0.0, 1.0)
}

/// Builds the synthesis request: system mandate, history, then the query
/// with its grounding excerpts.
fn build_generate_request(
    query: &str,
    history: &[HistoryTurn],
    hits: &[RetrievedHit],
    model: Option<String>,
) -> GenerateRequest {
    let mut messages: Vec<ChatMessage> = vec![system_message(SYNTHESIS_SYSTEM_PROMPT)];
    for turn in history {
        messages.push(user_message(&turn.user));
        messages.push(crate::llm::assistant_message(&turn.assistant));
    }

    let mut prompt = String::with_capacity(1024);
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt.push_str("\n\nExcerpts:\n");
    for hit in hits {
        prompt.push_str(&format!(
            "[chunk:{}] ({}, {}, {}) {}\n",
            hit.chunk.chunk_id,
            hit.chunk.authority_tier,
            hit.chunk.evidence_level,
            hit.chunk.year,
            hit.chunk.text
        ));
    }
    messages.push(user_message(&prompt));

    GenerateRequest {
        messages,
        tools: Vec::new(),
        max_output_tokens: SYNTHESIS_MAX_TOKENS,
        reasoning_effort: None,
        model,
    }
}

/// Renders the canned emergency response from the retrieved hits.
fn render_emergency_html(hits: &[RetrievedHit], citations: &[Citation]) -> String {
    let mut html = String::with_capacity(1024);
    html.push_str("<div class=\"emergency\">\n<p><strong>");
    html.push_str(EMERGENCY_PROTOCOL_HEADER);
    html.push_str("</strong></p>\n<ul>\n");
    for hit in hits {
        html.push_str(&format!(
            "<li>[{}] ({}, {}) {}</li>\n",
            hit.chunk.chunk_id, hit.chunk.authority_tier, hit.chunk.year, hit.chunk.text
        ));
    }
    html.push_str("</ul>\n</div>\n");
    html.push_str(&reference_list_html(citations));
    html
}

/// Renders the evidence-only response used when synthesis is unavailable.
fn render_evidence_only_html(hits: &[RetrievedHit], citations: &[Citation]) -> String {
    let mut html = String::with_capacity(1024);
    html.push_str("<p>Synthesis was unavailable; the ranked evidence is shown directly.</p>\n<ul>\n");
    for hit in hits {
        html.push_str(&format!(
            "<li>[{}] ({}, {}) {}</li>\n",
            hit.chunk.chunk_id, hit.chunk.authority_tier, hit.chunk.year, hit.chunk.text
        ));
    }
    html.push_str("</ul>\n");
    html.push_str(&reference_list_html(citations));
    html
}

fn reference_list_html(citations: &[Citation]) -> String {
    let visible: Vec<&Citation> = citations.iter().filter(|c| c.visible).collect();
    if visible.is_empty() {
        return String::new();
    }
    let mut html = String::from("<ol class=\"references\">\n");
    for citation in visible {
        html.push_str(&format!(
            "<li>{} ({}). {}. {}.</li>\n",
            citation.authors, citation.year, citation.title, citation.venue
        ));
    }
    html.push_str("</ol>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::{CitationIndex, default_visible_doctypes};
    use crate::embedding::{DEFAULT_DIMENSIONS, HashedEncoder};
    use crate::error::LlmError;
    use crate::index::{Bm25Index, Bm25Params, ChunkStore, TermIndex};
    use crate::llm::GenerateResponse;
    use crate::safety::SafetyTuning;
    use crate::search::{
        DenseClient, InMemoryVectorStore, PrecedenceModel, TokenOverlapReranker,
    };
    use crate::text::MedicalLexicon;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NDJSON: &str = r#"{"chunk_id":"hemoptysis_a1","text":"Massive hemoptysis: secure the airway, bleeding side down, rigid bronchoscopy for tamponade.","doc_id":"papoip","doc_type":"book_chapter","section_title":"Hemoptysis","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","aliases":["massive hemoptysis"],"tags":["has_emergency_pattern"]}
{"chunk_id":"fiducial_a1","text":"Fiducial marker placement: use 3-6 markers, 1.5-5 cm apart, non-collinear, around the tumor.","doc_id":"papoip","doc_type":"book_chapter","section_title":"Fiducials","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","aliases":["fiducial marker"]}
{"chunk_id":"sems_warn","text":"SEMS are contraindicated in resectable disease and benign stenosis when surgery is an option.","doc_id":"chest_sems","doc_type":"guideline","section_title":"SEMS","section_kind":"contraindications","year":2024,"authority_tier":"A2","evidence_level":"H1","domain":"clinical","aliases":["self-expanding metal stent"],"tags":["has_contraindication"]}
{"chunk_id":"coding_31622","text":"CPT 31622 diagnostic bronchoscopy is bundled into any surgical bronchoscopy code.","doc_id":"coding_guide","doc_type":"book_chapter","section_title":"Bronchoscopy Coding","section_kind":"table_row","year":2024,"authority_tier":"A2","evidence_level":"H3","domain":"coding_billing","cpt_codes":["31622"],"tags":["has_table"]}
{"chunk_id":"stent_cpt","text":"Tracheal stent placement is reported with CPT 31631.","doc_id":"papoip","doc_type":"book_chapter","section_title":"Airway Stents","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","cpt_codes":["31631"],"aliases":["tracheal stent"]}
"#;

    const CITATIONS_JSON: &str = r#"{
        "papoip": {"authors": ["Ernst A", "Herth F"], "year": 2025, "title": "Principles and Practice of Interventional Pulmonology", "venue": "Springer", "doc_type": "book_chapter"},
        "chest_sems": {"authors": ["Ost D"], "year": 2024, "title": "Airway stenting guideline", "venue": "Chest", "doc_type": "guideline"},
        "coding_guide": {"authors": ["AMA"], "year": 2024, "title": "Bronchoscopy coding companion", "venue": "AMA Press", "doc_type": "book_chapter"}
    }"#;

    struct ScriptedModel {
        text: String,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> std::result::Result<GenerateResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerateResponse {
                text: self.text.clone(),
                tool_calls: Vec::new(),
                raw: serde_json::json!({}),
            })
        }
    }

    fn orchestrator(llm: Option<Arc<ScriptedModel>>) -> Orchestrator {
        let store = Arc::new(ChunkStore::from_ndjson(NDJSON).unwrap());
        let term = Arc::new(TermIndex::build(&store));
        let chunks: Vec<_> = store.iter().cloned().collect();
        let bm25 = Arc::new(Bm25Index::build(&chunks, Bm25Params::default()));
        let encoder = HashedEncoder::new(DEFAULT_DIMENSIONS);
        let vectors = InMemoryVectorStore::build(&store, &encoder).unwrap();
        let dense = DenseClient::new(Arc::new(encoder), Arc::new(vectors));

        let config = Config::builder().current_year(2026).build().unwrap();
        let retriever = Arc::new(
            HybridRetriever::new(
                Arc::clone(&store),
                term,
                config.precedence_model(),
                config.retrieval_tuning(),
            )
            .with_bm25(bm25)
            .with_dense(dense)
            .with_reranker(Arc::new(TokenOverlapReranker)),
        );

        let lexicon = MedicalLexicon::from_corpus(store.iter().map(AsRef::as_ref));
        let normalizer = QueryNormalizer::new(lexicon);
        let safety = SafetyLayer::new(SafetyTuning::default()).unwrap();
        let resolver = CitationResolver::new(
            Arc::new(CitationIndex::from_json(CITATIONS_JSON).unwrap()),
            default_visible_doctypes(),
        );

        let mut orchestrator = Orchestrator::new(retriever, normalizer, safety, resolver, config);
        if let Some(llm) = llm {
            orchestrator = orchestrator.with_llm(llm);
        }
        orchestrator
    }

    fn request(query: &str) -> AnswerRequest {
        AnswerRequest {
            query: query.to_string(),
            ..AnswerRequest::default()
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let orchestrator = orchestrator(None);
        assert!(orchestrator.answer(request("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_clinical_query_with_synthesis() {
        let llm = Arc::new(ScriptedModel::new(
            "Place 3-6 markers, 1.5-5 cm apart, non-collinear [chunk:fiducial_a1].",
        ));
        let orchestrator = orchestrator(Some(Arc::clone(&llm)));
        let bundle = orchestrator
            .answer(request("fiducial marker placement requirements"))
            .await
            .unwrap();

        assert!(!bundle.is_emergency);
        assert!(bundle.answer_html.contains("non-collinear"));
        assert!((0.0..=1.0).contains(&bundle.confidence));
        assert!(bundle.grounding_chunks.contains(&"fiducial_a1".to_string()));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emergency_fast_path_skips_llm() {
        let llm = Arc::new(ScriptedModel::new("should not be called"));
        let orchestrator = orchestrator(Some(Arc::clone(&llm)));
        let bundle = orchestrator
            .answer(request("management of massive hemoptysis >200 ml"))
            .await
            .unwrap();

        assert!(bundle.is_emergency);
        assert_eq!(bundle.classification, QueryClass::Emergency);
        assert!(bundle.answer_html.contains("EMERGENCY PROTOCOL"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_llm_returns_evidence_only() {
        let orchestrator = orchestrator(None);
        let bundle = orchestrator
            .answer(request("fiducial marker placement requirements"))
            .await
            .unwrap();
        assert!(bundle.answer_html.contains("Synthesis was unavailable"));
        assert!(bundle.warnings.iter().any(|w| w.contains("llm unavailable")));
        assert!(!bundle.grounding_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_second_synthesis() {
        let llm = Arc::new(ScriptedModel::new("Answer [chunk:fiducial_a1]."));
        let orchestrator = orchestrator(Some(Arc::clone(&llm)));
        let first = orchestrator
            .answer(request("fiducial marker placement requirements"))
            .await
            .unwrap();
        let second = orchestrator
            .answer(request("fiducial marker placement requirements"))
            .await
            .unwrap();
        assert_eq!(first.answer_html, second.answer_html);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_safety_query_flags_missing_contraindication() {
        let llm = Arc::new(ScriptedModel::new(
            "SEMS can be placed through the rigid scope [chunk:sems_warn].",
        ));
        let orchestrator = orchestrator(Some(llm));
        let bundle = orchestrator
            .answer(request("sems safety in benign tracheal stenosis"))
            .await
            .unwrap();

        assert_eq!(bundle.classification, QueryClass::Safety);
        assert!(bundle.review_required);
        assert!(bundle
            .safety_warnings
            .iter()
            .any(|w| w.contains("contraindicated in resectable disease")));
    }

    #[tokio::test]
    async fn test_coding_query_prefers_coding_domain() {
        let llm = Arc::new(ScriptedModel::new(
            "CPT 31622 is bundled [chunk:coding_31622].",
        ));
        let orchestrator = orchestrator(Some(llm));
        let bundle = orchestrator.answer(request("cpt 31622")).await.unwrap();
        assert_eq!(bundle.classification, QueryClass::Coding);
        assert!(bundle
            .grounding_chunks
            .contains(&"coding_31622".to_string()));
    }

    #[tokio::test]
    async fn test_exact_cpt_in_clinical_chunk_survives_coding_class() {
        let llm = Arc::new(ScriptedModel::new(
            "Tracheal stenting is reported with 31631 [chunk:stent_cpt].",
        ));
        let orchestrator = orchestrator(Some(llm));
        let bundle = orchestrator.answer(request("cpt 31631")).await.unwrap();
        assert_eq!(bundle.classification, QueryClass::Coding);
        // The chunk carrying the CPT lives in the clinical domain; the
        // coding preference must not gate it out.
        assert!(bundle.grounding_chunks.contains(&"stent_cpt".to_string()));
    }

    #[tokio::test]
    async fn test_session_history_recorded() {
        let llm = Arc::new(ScriptedModel::new("Answer [chunk:fiducial_a1]."));
        let orchestrator = orchestrator(Some(llm));
        let mut req = request("fiducial marker placement requirements");
        req.session_id = Some("s1".to_string());
        orchestrator.answer(req).await.unwrap();
        let history = orchestrator.sessions.history("s1").await;
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(confidence_from_hits(&[]).abs() < f64::EPSILON);
    }
}
