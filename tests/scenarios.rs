//! End-to-end scenarios over a seeded corpus.
//!
//! Exercises the full pipeline (normalize → classify → retrieve → safety →
//! synthesize → cite) with the hashed encoder, the in-memory vector store,
//! and a scripted synthesis model, plus the engine's property-based
//! invariants.

#![allow(clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use proptest::prelude::*;

use ip_assist::citation::{CitationIndex, CitationResolver, default_visible_doctypes};
use ip_assist::coder::{CodingKb, ProceduralCoder, why};
use ip_assist::config::Config;
use ip_assist::core::{AuthorityTier, Domain, EvidenceLevel, QueryClass, SearchFilters};
use ip_assist::embedding::{DEFAULT_DIMENSIONS, HashedEncoder};
use ip_assist::error::LlmError;
use ip_assist::index::{Bm25Index, Bm25Params, ChunkStore, TermIndex};
use ip_assist::llm::{GenerateRequest, GenerateResponse, LanguageModel};
use ip_assist::orchestrator::{AnswerRequest, Orchestrator};
use ip_assist::safety::{SafetyLayer, SafetyTuning};
use ip_assist::search::{
    DenseClient, HybridRetriever, InMemoryVectorStore, PrecedenceModel, SearchRequest,
    TokenOverlapReranker,
};
use ip_assist::text::{MedicalLexicon, QueryNormalizer};

const CURRENT_YEAR: i32 = 2026;

const CORPUS: &str = r#"{"chunk_id":"fiducial_a1","text":"Fiducial marker placement for stereotactic radiotherapy: place 3-6 markers, 1.5-5 cm apart, non-collinear, bracketing the tumor.","doc_id":"papoip","doc_type":"book_chapter","section_title":"Fiducial Markers","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","aliases":["fiducial marker"]}
{"chunk_id":"fiducial_a4","text":"A cohort of fiducial marker placements showed low migration rates.","doc_id":"fiducial_cohort","doc_type":"cohort","section_title":"Outcomes","section_kind":"general","year":2018,"authority_tier":"A4","evidence_level":"H3","domain":"clinical","aliases":["fiducial marker"]}
{"chunk_id":"thoraco_a2","text":"Medical thoracoscopy competency requires 20 supervised procedures for initial training and 10/year to maintain proficiency.","doc_id":"practical_ip","doc_type":"book_chapter","section_title":"Thoracoscopy Training","section_kind":"procedure","year":2022,"authority_tier":"A2","evidence_level":"H3","domain":"clinical","aliases":["medical thoracoscopy"]}
{"chunk_id":"sems_contra","text":"Self-expanding metal stent placement is contraindicated in resectable disease and in benign stenosis when surgical repair is feasible.","doc_id":"chest_sems","doc_type":"guideline","section_title":"SEMS Contraindications","section_kind":"contraindications","year":2024,"authority_tier":"A2","evidence_level":"H1","domain":"clinical","aliases":["self-expanding metal stent"],"tags":["has_contraindication"]}
{"chunk_id":"hemoptysis_a1","text":"Massive hemoptysis: position bleeding side down, secure the airway with a large endotracheal tube, and proceed to rigid bronchoscopy for tamponade.","doc_id":"papoip","doc_type":"book_chapter","section_title":"Massive Hemoptysis","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","aliases":["massive hemoptysis"],"tags":["has_emergency_pattern"]}
{"chunk_id":"hemoptysis_a4","text":"A case of massive hemoptysis managed with bronchial artery embolization.","doc_id":"hemo_case","doc_type":"case","section_title":"Case Report","section_kind":"general","year":2020,"authority_tier":"A4","evidence_level":"H4","domain":"clinical","aliases":["massive hemoptysis"]}
{"chunk_id":"coding_31622","text":"CPT 31622 diagnostic bronchoscopy is bundled into any surgical bronchoscopy performed in the same session.","doc_id":"coding_comp","doc_type":"book_chapter","section_title":"Bronchoscopy Coding","section_kind":"table_row","year":2019,"authority_tier":"A2","evidence_level":"H3","domain":"coding_billing","cpt_codes":["31622"],"tags":["has_table"]}
{"chunk_id":"ebus_proc","text":"Convex EBUS-TBNA technique: systematic mediastinal staging samples N3, N2, then N1 stations.","doc_id":"papoip","doc_type":"book_chapter","section_title":"EBUS","section_kind":"procedure","year":2025,"authority_tier":"A1","evidence_level":"H3","domain":"clinical","aliases":["ebus-tbna"]}
"#;

const CITATIONS_JSON: &str = r#"{
    "papoip": {"authors": ["Ernst A", "Herth F"], "year": 2025, "title": "Principles and Practice of Interventional Pulmonology", "venue": "Springer", "doc_type": "book_chapter"},
    "practical_ip": {"authors": ["Mehta A", "Jain P"], "year": 2022, "title": "Practical Interventional Pulmonology", "venue": "CRC Press", "doc_type": "book_chapter"},
    "chest_sems": {"authors": ["Ost D", "Shah P"], "year": 2024, "title": "Airway stenting in malignant and benign disease", "venue": "Chest", "doc_type": "guideline"},
    "hemo_case": {"authors": ["Lee K"], "year": 2020, "title": "Embolization for massive hemoptysis", "venue": "Respiration", "doc_type": "case"},
    "fiducial_cohort": {"authors": ["Steinfort D"], "year": 2018, "title": "Fiducial migration outcomes", "venue": "J Bronchology", "doc_type": "cohort"},
    "coding_comp": {"authors": ["AMA"], "year": 2019, "title": "Bronchoscopy coding companion", "venue": "AMA Press", "doc_type": "book_chapter"}
}"#;

const KB_JSON: &str = r#"{
    "version": "2026-q1",
    "cpt_descriptions": {
        "31622": "Bronchoscopy, diagnostic",
        "31652": "Bronchoscopy with EBUS-TBNA, 1 or 2 stations",
        "31653": "Bronchoscopy with EBUS-TBNA, 3 or more stations",
        "31654": "Radial EBUS during bronchoscopy"
    },
    "ncci_bundles": {"31622": ["31652", "31653"]},
    "bilateral_eligible": [],
    "addon_families": {},
    "icd10_pcs_crosswalk": {"ebus_tbna": ["0BD58ZX"]},
    "hcpcs_supplies": {}
}"#;

struct ScriptedModel {
    text: String,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        Ok(GenerateResponse {
            text: self.text.clone(),
            tool_calls: Vec::new(),
            raw: serde_json::json!({"model": "scripted"}),
        })
    }
}

fn store() -> Arc<ChunkStore> {
    Arc::new(ChunkStore::from_ndjson(CORPUS).expect("corpus should parse"))
}

fn retriever(store: &Arc<ChunkStore>, config: &Config) -> Arc<HybridRetriever> {
    let term = Arc::new(TermIndex::build(store));
    let chunks: Vec<_> = store.iter().cloned().collect();
    let bm25 = Arc::new(Bm25Index::build(&chunks, Bm25Params::default()));
    let encoder = HashedEncoder::new(DEFAULT_DIMENSIONS);
    let vectors = InMemoryVectorStore::build(store, &encoder).expect("vectors should build");
    let dense = DenseClient::new(Arc::new(encoder), Arc::new(vectors));
    Arc::new(
        HybridRetriever::new(
            Arc::clone(store),
            term,
            config.precedence_model(),
            config.retrieval_tuning(),
        )
        .with_bm25(bm25)
        .with_dense(dense)
        .with_reranker(Arc::new(TokenOverlapReranker)),
    )
}

fn orchestrator(draft: Option<&str>) -> (Orchestrator, Arc<ChunkStore>) {
    let store = store();
    let config = Config::builder()
        .current_year(CURRENT_YEAR)
        .build()
        .expect("config should build");
    let retriever = retriever(&store, &config);

    let lexicon = MedicalLexicon::from_corpus(store.iter().map(AsRef::as_ref));
    let normalizer = QueryNormalizer::new(lexicon);
    let safety = SafetyLayer::new(SafetyTuning::default()).expect("safety layer should build");
    let resolver = CitationResolver::new(
        Arc::new(CitationIndex::from_json(CITATIONS_JSON).expect("citation index should parse")),
        default_visible_doctypes(),
    );
    let coder = Arc::new(ProceduralCoder::new(
        CodingKb::from_json(KB_JSON, "fallback").expect("KB should parse"),
    ));

    let mut orchestrator =
        Orchestrator::new(retriever, normalizer, safety, resolver, config).with_coder(coder);
    if let Some(draft) = draft {
        orchestrator = orchestrator.with_llm(Arc::new(ScriptedModel {
            text: draft.to_string(),
        }));
    }
    (orchestrator, store)
}

fn request(query: &str) -> AnswerRequest {
    AnswerRequest {
        query: query.to_string(),
        ..AnswerRequest::default()
    }
}

#[tokio::test]
async fn scenario_fiducial_markers() {
    let (orchestrator, store) = orchestrator(Some(
        "Place 3-6 markers, 1.5-5 cm apart, non-collinear [chunk:fiducial_a1].",
    ));
    let bundle = orchestrator
        .answer(request("fiducial marker placement requirements"))
        .await
        .expect("answer should succeed");

    assert!(!bundle.is_emergency);

    let top = store
        .get(&bundle.grounding_chunks[0])
        .expect("top grounding chunk should exist");
    assert_eq!(top.authority_tier, AuthorityTier::A1);
    assert!(top.text.contains("3-6 markers"));
    assert!(top.text.contains("1.5-5 cm"));
    assert!(top.text.contains("non-collinear"));

    // An A1 chunk grounds the answer, but textbook chapters never appear
    // in the visible reference list.
    assert!(bundle
        .citations
        .iter()
        .any(|c| c.doc_id == "papoip" && !c.visible));
    assert!(!bundle.citations.iter().any(|c| c.visible && c.doc_id == "papoip"));
}

#[tokio::test]
async fn scenario_thoracoscopy_competency() {
    let (orchestrator, store) = orchestrator(Some(
        "Competency requires 20 supervised procedures and 10/year [chunk:thoraco_a2].",
    ));
    let bundle = orchestrator
        .answer(request("medical thoracoscopy training requirements"))
        .await
        .expect("answer should succeed");

    let top = store
        .get(&bundle.grounding_chunks[0])
        .expect("top grounding chunk should exist");
    assert!(top.text.contains("20 supervised"));
    assert!(top.text.contains("10/year"));
    assert!(matches!(
        top.authority_tier,
        AuthorityTier::A1 | AuthorityTier::A2
    ));
}

#[tokio::test]
async fn scenario_sems_benign_stenosis() {
    // The scripted draft omits the contraindication entirely.
    let (orchestrator, _) = orchestrator(Some(
        "SEMS can be deployed through a flexible scope [chunk:sems_contra].",
    ));
    let bundle = orchestrator
        .answer(request("SEMS benign tracheal stenosis"))
        .await
        .expect("answer should succeed");

    assert!(bundle
        .safety_warnings
        .iter()
        .any(|w| w.contains("contraindicated in resectable disease")));
    assert!(bundle.review_required);
}

#[tokio::test]
async fn scenario_massive_hemoptysis_fast_path() {
    let (orchestrator, store) = orchestrator(Some("synthesis must not run"));
    let started = Instant::now();
    let bundle = orchestrator
        .answer(request("management of massive hemoptysis >200 mL"))
        .await
        .expect("answer should succeed");
    let elapsed = started.elapsed();

    assert!(bundle.is_emergency);
    assert_eq!(bundle.classification, QueryClass::Emergency);
    assert!(bundle.answer_html.contains("EMERGENCY PROTOCOL"));
    assert!(elapsed < Duration::from_millis(500), "fast path took {elapsed:?}");

    // Only A1/A2 sources are cited on the fast path.
    for chunk_id in &bundle.grounding_chunks {
        let chunk = store.get(chunk_id).expect("grounding chunk should exist");
        assert!(matches!(
            chunk.authority_tier,
            AuthorityTier::A1 | AuthorityTier::A2
        ));
    }
}

#[tokio::test]
async fn scenario_cpt_exact_match() {
    let (orchestrator, _) = orchestrator(Some(
        "31622 is bundled into surgical bronchoscopy [chunk:coding_31622].",
    ));
    let bundle = orchestrator.answer(request("CPT 31622")).await.expect("answer should succeed");

    assert_eq!(bundle.classification, QueryClass::Coding);
    assert!(
        bundle.grounding_chunks[..bundle.grounding_chunks.len().min(3)]
            .contains(&"coding_31622".to_string())
    );
    assert!(bundle.warnings.iter().any(|w| w.contains("stale_coding")));
    assert!(bundle.citations.iter().any(|c| c.year == 2019));
    assert_eq!(bundle.kb_version.as_deref(), Some("2026-q1"));
}

#[test]
fn scenario_operative_note_coding() {
    let coder = ProceduralCoder::new(CodingKb::from_json(KB_JSON, "fallback").expect("KB parses"));
    let bundle = coder.code_note(
        "Convex EBUS-TBNA with sampling of stations 4R, 7, and 11L; 22G needle x3 passes each; \
         ROSE adequate. Patient under general anesthesia via ETT.",
        None,
    );

    assert_eq!(bundle.primary_cpts, vec!["31653".to_string()]);
    assert!(bundle.sedation_family.is_none());
    assert!(bundle.warnings.iter().any(|w| w == "no moderate sedation under GA"));
    assert_eq!(bundle.kb_version, "2026-q1");

    let explanation = why(&bundle, "31653").expect("explanation should exist");
    for station in ["4R", "7", "11L"] {
        assert!(explanation.contains(station), "explanation missing {station}");
    }
}

#[tokio::test]
async fn retrieved_hits_exist_in_payload_store() {
    let store = store();
    let config = Config::builder()
        .current_year(CURRENT_YEAR)
        .build()
        .expect("config builds");
    let retriever = retriever(&store, &config);
    let filters = SearchFilters::default();

    for query in ["fiducial marker", "thoracoscopy", "hemoptysis", "ebus staging"] {
        let outcome = retriever
            .search(SearchRequest {
                query,
                class: QueryClass::Clinical,
                k: 5,
                filters: &filters,
                use_reranker: false,
                dense_timeout: Duration::from_millis(2_500),
            })
            .await
            .expect("search should succeed");
        for hit in &outcome.hits {
            assert!(store.contains(hit.chunk_id()), "{} missing", hit.chunk_id());
        }
    }
}

#[tokio::test]
async fn filter_tightening_never_grows_results() {
    let store = store();
    let config = Config::builder()
        .current_year(CURRENT_YEAR)
        .build()
        .expect("config builds");
    let retriever = retriever(&store, &config);

    let loose = SearchFilters::default();
    let tight = SearchFilters {
        year_min: Some(2024),
        ..SearchFilters::default()
    };

    let run = |filters: &SearchFilters| {
        let retriever = Arc::clone(&retriever);
        let filters = filters.clone();
        async move {
            match retriever
                .search(SearchRequest {
                    query: "fiducial marker placement",
                    class: QueryClass::Clinical,
                    k: 10,
                    filters: &filters,
                    use_reranker: false,
                    dense_timeout: Duration::from_millis(2_500),
                })
                .await
            {
                Ok(outcome) => outcome
                    .hits
                    .iter()
                    .map(|h| h.chunk_id().to_string())
                    .collect::<Vec<_>>(),
                Err(_) => Vec::new(),
            }
        }
    };

    let loose_ids = run(&loose).await;
    let tight_ids = run(&tight).await;
    assert!(tight_ids.len() <= loose_ids.len());
    for id in &tight_ids {
        assert!(loose_ids.contains(id), "tightening introduced {id}");
    }
}

proptest! {
    #[test]
    fn prop_query_normalizer_idempotent(raw in "[ -~]{0,120}") {
        let store = store();
        let lexicon = MedicalLexicon::from_corpus(store.iter().map(AsRef::as_ref));
        let normalizer = QueryNormalizer::new(lexicon);
        let once = normalizer.normalize(&raw);
        let twice = normalizer.normalize(&once.text);
        prop_assert_eq!(once.text, twice.text);
    }

    #[test]
    fn prop_precedence_in_unit_interval(
        year in 1950i32..2030,
        tier_idx in 0usize..4,
        level_idx in 0usize..4,
        domain_idx in 0usize..5,
    ) {
        let tier = [AuthorityTier::A1, AuthorityTier::A2, AuthorityTier::A3, AuthorityTier::A4][tier_idx];
        let level = [EvidenceLevel::H1, EvidenceLevel::H2, EvidenceLevel::H3, EvidenceLevel::H4][level_idx];
        let domain = Domain::all()[domain_idx];

        let chunk: ip_assist::core::Chunk = serde_json::from_value(serde_json::json!({
            "chunk_id": "p1",
            "text": "text",
            "doc_id": "d",
            "doc_type": "guideline",
            "section_title": "s",
            "section_kind": "general",
            "year": year,
            "authority_tier": tier.as_str(),
            "evidence_level": level.as_str(),
            "domain": domain.as_str(),
        })).expect("chunk should build");

        let model = PrecedenceModel::new(
            Domain::all().into_iter().map(|d| (d, d.default_half_life_years())).collect::<BTreeMap<_, _>>(),
            0.7,
            CURRENT_YEAR,
        );

        let precedence = model.precedence(&chunk);
        prop_assert!((0.0..=1.0).contains(&precedence), "precedence {} out of range", precedence);

        if tier == AuthorityTier::A1 {
            prop_assert!(model.recency(&chunk) >= 0.7 - f64::EPSILON);
        }
    }
}
