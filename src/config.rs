//! Engine configuration with builder and environment-variable support.
//!
//! Configuration is resolved in order: explicit values, then environment
//! variables, then defaults. The score weights, half-lives, budgets, and
//! cache bounds are tuning parameters, and every operational knob lives
//! here.

use std::collections::BTreeMap;

use crate::citation::default_visible_doctypes;
use crate::core::{DocType, Domain};
use crate::error::Error;
use crate::safety::SafetyTuning;
use crate::search::{
    DEFAULT_A1_FLOOR, DEFAULT_RERANK_BATCH, DEFAULT_RERANK_DEPTH, DEFAULT_TOP_M, MAX_TOP_K,
    PrecedenceModel, RetrievalTuning,
};

/// Default result count.
const DEFAULT_TOP_K: usize = 5;
/// Default result-cache TTL in seconds.
const DEFAULT_CACHE_TTL_SEC: u64 = 600;
/// Default result-cache capacity.
const DEFAULT_CACHE_MAX: usize = 256;
/// Default overall request budget in milliseconds.
const DEFAULT_REQUEST_MS: u64 = 5_000;
/// Default emergency fast-path budget in milliseconds.
const DEFAULT_EMERGENCY_MS: u64 = 500;
/// Default turns of conversation history kept per session.
const DEFAULT_SESSION_TURNS: usize = 6;

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Candidates per retrieval leg.
    pub top_m: usize,
    /// Default result count when the request leaves it unset.
    pub top_k: usize,
    /// Whether the reranker runs by default.
    pub reranker_enabled: bool,
    /// How many top candidates the reranker rescores.
    pub rerank_depth: usize,
    /// Reranker inference batch size.
    pub rerank_batch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_m: DEFAULT_TOP_M,
            top_k: DEFAULT_TOP_K,
            reranker_enabled: true,
            rerank_depth: DEFAULT_RERANK_DEPTH,
            rerank_batch: DEFAULT_RERANK_BATCH,
        }
    }
}

/// Precedence-model configuration.
#[derive(Debug, Clone)]
pub struct PrecedenceConfig {
    /// Recency half-life per domain, in years.
    pub half_lives: BTreeMap<Domain, f64>,
    /// Minimum recency weight for A1 chunks.
    pub a1_floor: f64,
    /// Reference year for recency; defaults to the wall clock.
    pub current_year: i32,
}

impl Default for PrecedenceConfig {
    fn default() -> Self {
        Self {
            half_lives: Domain::all()
                .into_iter()
                .map(|d| (d, d.default_half_life_years()))
                .collect(),
            a1_floor: DEFAULT_A1_FLOOR,
            current_year: time::OffsetDateTime::now_utc().year(),
        }
    }
}

/// Citation-policy configuration.
#[derive(Debug, Clone)]
pub struct CitationConfig {
    /// Document types shown in the visible reference list.
    pub visible_doctypes: std::collections::BTreeSet<DocType>,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            visible_doctypes: default_visible_doctypes(),
        }
    }
}

/// Result-cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds.
    pub ttl_sec: u64,
    /// Maximum cached entries before LRU eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_sec: DEFAULT_CACHE_TTL_SEC,
            max_entries: DEFAULT_CACHE_MAX,
        }
    }
}

/// Request budget configuration.
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// Overall request budget in milliseconds.
    pub request_ms: u64,
    /// Emergency fast-path budget in milliseconds.
    pub emergency_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            request_ms: DEFAULT_REQUEST_MS,
            emergency_ms: DEFAULT_EMERGENCY_MS,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Retrieval knobs.
    pub retrieval: RetrievalConfig,
    /// Precedence-model knobs.
    pub precedence: PrecedenceConfig,
    /// Safety-layer knobs.
    pub safety: SafetyTuning,
    /// Citation policy.
    pub citation: CitationConfig,
    /// Result-cache knobs.
    pub cache: CacheConfig,
    /// Request budgets.
    pub budget: BudgetConfig,
    /// Turns of conversation history kept per session.
    pub session_turns: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            precedence: PrecedenceConfig::default(),
            safety: SafetyTuning::default(),
            citation: CitationConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            session_turns: DEFAULT_SESSION_TURNS,
        }
    }
}

impl Config {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value fails validation.
    pub fn from_env() -> Result<Self, Error> {
        Self::builder().from_env().build()
    }

    /// The retriever tuning derived from this configuration.
    #[must_use]
    pub const fn retrieval_tuning(&self) -> RetrievalTuning {
        RetrievalTuning {
            top_m: self.retrieval.top_m,
            rerank_depth: self.retrieval.rerank_depth,
            rerank_batch: self.retrieval.rerank_batch,
        }
    }

    /// The precedence model derived from this configuration.
    #[must_use]
    pub fn precedence_model(&self) -> PrecedenceModel {
        PrecedenceModel::new(
            self.precedence.half_lives.clone(),
            self.precedence.a1_floor,
            self.precedence.current_year,
        )
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    top_m: Option<usize>,
    top_k: Option<usize>,
    reranker_enabled: Option<bool>,
    half_lives: Option<BTreeMap<Domain, f64>>,
    a1_floor: Option<f64>,
    current_year: Option<i32>,
    safety: Option<SafetyTuning>,
    visible_doctypes: Option<std::collections::BTreeSet<DocType>>,
    cache_ttl_sec: Option<u64>,
    cache_max: Option<usize>,
    request_ms: Option<u64>,
    emergency_ms: Option<u64>,
    session_turns: Option<usize>,
}

impl ConfigBuilder {
    /// Populates unset fields from `IPA_*` environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if self.top_m.is_none() {
            self.top_m = parse_var("IPA_RETRIEVAL_TOP_M");
        }
        if self.top_k.is_none() {
            self.top_k = parse_var("IPA_RETRIEVAL_TOP_K");
        }
        if self.reranker_enabled.is_none() {
            self.reranker_enabled = parse_var("IPA_RERANKER_ENABLED");
        }
        if self.a1_floor.is_none() {
            self.a1_floor = parse_var("IPA_A1_FLOOR");
        }
        if self.cache_ttl_sec.is_none() {
            self.cache_ttl_sec = parse_var("IPA_CACHE_TTL_SEC");
        }
        if self.cache_max.is_none() {
            self.cache_max = parse_var("IPA_CACHE_MAX");
        }
        if self.request_ms.is_none() {
            self.request_ms = parse_var("IPA_BUDGET_REQUEST_MS");
        }
        if self.emergency_ms.is_none() {
            self.emergency_ms = parse_var("IPA_BUDGET_EMERGENCY_MS");
        }
        self
    }

    /// Sets the per-leg candidate count.
    #[must_use]
    pub const fn top_m(mut self, top_m: usize) -> Self {
        self.top_m = Some(top_m);
        self
    }

    /// Sets the default result count.
    #[must_use]
    pub const fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Enables or disables the reranker by default.
    #[must_use]
    pub const fn reranker_enabled(mut self, enabled: bool) -> Self {
        self.reranker_enabled = Some(enabled);
        self
    }

    /// Overrides the per-domain half-lives.
    #[must_use]
    pub fn half_lives(mut self, half_lives: BTreeMap<Domain, f64>) -> Self {
        self.half_lives = Some(half_lives);
        self
    }

    /// Overrides the A1 recency floor.
    #[must_use]
    pub const fn a1_floor(mut self, floor: f64) -> Self {
        self.a1_floor = Some(floor);
        self
    }

    /// Pins the reference year (tests use this for determinism).
    #[must_use]
    pub const fn current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    /// Overrides the safety tuning.
    #[must_use]
    pub fn safety(mut self, safety: SafetyTuning) -> Self {
        self.safety = Some(safety);
        self
    }

    /// Overrides the visible-reference document types.
    #[must_use]
    pub fn visible_doctypes(mut self, doctypes: std::collections::BTreeSet<DocType>) -> Self {
        self.visible_doctypes = Some(doctypes);
        self
    }

    /// Sets the result-cache TTL in seconds.
    #[must_use]
    pub const fn cache_ttl_sec(mut self, ttl: u64) -> Self {
        self.cache_ttl_sec = Some(ttl);
        self
    }

    /// Sets the result-cache capacity.
    #[must_use]
    pub const fn cache_max(mut self, max: usize) -> Self {
        self.cache_max = Some(max);
        self
    }

    /// Sets the overall request budget in milliseconds.
    #[must_use]
    pub const fn request_ms(mut self, ms: u64) -> Self {
        self.request_ms = Some(ms);
        self
    }

    /// Sets the emergency fast-path budget in milliseconds.
    #[must_use]
    pub const fn emergency_ms(mut self, ms: u64) -> Self {
        self.emergency_ms = Some(ms);
        self
    }

    /// Sets how many turns of history a session keeps.
    #[must_use]
    pub const fn session_turns(mut self, turns: usize) -> Self {
        self.session_turns = Some(turns);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a value is out of range.
    pub fn build(self) -> Result<Config, Error> {
        let defaults = Config::default();
        let config = Config {
            retrieval: RetrievalConfig {
                top_m: self.top_m.unwrap_or(defaults.retrieval.top_m),
                top_k: self.top_k.unwrap_or(defaults.retrieval.top_k),
                reranker_enabled: self
                    .reranker_enabled
                    .unwrap_or(defaults.retrieval.reranker_enabled),
                rerank_depth: defaults.retrieval.rerank_depth,
                rerank_batch: defaults.retrieval.rerank_batch,
            },
            precedence: PrecedenceConfig {
                half_lives: self.half_lives.unwrap_or(defaults.precedence.half_lives),
                a1_floor: self.a1_floor.unwrap_or(defaults.precedence.a1_floor),
                current_year: self
                    .current_year
                    .unwrap_or(defaults.precedence.current_year),
            },
            safety: self.safety.unwrap_or(defaults.safety),
            citation: CitationConfig {
                visible_doctypes: self
                    .visible_doctypes
                    .unwrap_or(defaults.citation.visible_doctypes),
            },
            cache: CacheConfig {
                ttl_sec: self.cache_ttl_sec.unwrap_or(defaults.cache.ttl_sec),
                max_entries: self.cache_max.unwrap_or(defaults.cache.max_entries),
            },
            budget: BudgetConfig {
                request_ms: self.request_ms.unwrap_or(defaults.budget.request_ms),
                emergency_ms: self.emergency_ms.unwrap_or(defaults.budget.emergency_ms),
            },
            session_turns: self.session_turns.unwrap_or(DEFAULT_SESSION_TURNS),
        };

        if !(0.0..=1.0).contains(&config.precedence.a1_floor) {
            return Err(Error::Config {
                message: format!("a1_floor {} must be in [0,1]", config.precedence.a1_floor),
            });
        }
        if config.retrieval.top_k == 0 || config.retrieval.top_k > MAX_TOP_K {
            return Err(Error::Config {
                message: format!("top_k {} must be in 1..=50", config.retrieval.top_k),
            });
        }
        if let Some((domain, half_life)) = config
            .precedence
            .half_lives
            .iter()
            .find(|&(_, &hl)| hl <= 0.0)
        {
            return Err(Error::Config {
                message: format!("half-life {half_life} for {domain} must be positive"),
            });
        }
        if config.budget.emergency_ms > config.budget.request_ms {
            return Err(Error::Config {
                message: "emergency budget exceeds the overall request budget".to_string(),
            });
        }
        if config.cache.max_entries == 0 {
            return Err(Error::Config {
                message: "cache.max_entries must be positive".to_string(),
            });
        }

        Ok(config)
    }
}
