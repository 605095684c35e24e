use serde::Deserialize;
use std::env;

use crate::error::{RagError, Result};
use crate::index::SimilarityMetric;
use crate::models::BudgetUnit;
use crate::search::ScoreWeights;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub embeddings: EmbeddingsConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub grounding: GroundingConfig,
    pub retry: RetryConfig,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    /// `provider/model`, e.g. `openai/text-embedding-3-small`, `local/bge-small-en-v1.5`
    /// or `hash/cti-hash-v1`. A bare model name resolves to the local provider.
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: "hash/cti-hash-v1".to_string(),
            dimensions: 384,
            batch_size: 64,
            api_key: None,
            base_url: None,
            timeout_secs: 30,
            cache_size: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in bytes.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks as a fraction of `chunk_size`.
    pub chunk_overlap: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub overfetch_factor: usize,
    pub score_weights: ScoreWeights,
    pub staleness_horizon_days: u32,
    /// Confidence assumed for chunks whose document carries none.
    pub default_confidence: f64,
    pub index_timeout_ms: u64,
    pub similarity: SimilarityMetric,
    pub ingest_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            overfetch_factor: 3,
            score_weights: ScoreWeights::default(),
            staleness_horizon_days: 365,
            default_confidence: 0.5,
            index_timeout_ms: 2000,
            similarity: SimilarityMetric::Cosine,
            ingest_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub budget: usize,
    pub budget_unit: BudgetUnit,
    pub dedup_prefix_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: 6000,
            budget_unit: BudgetUnit::Chars,
            dedup_prefix_chars: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroundingConfig {
    pub support_threshold: f64,
    /// Blend embedding similarity into sentence support scores.
    pub semantic: bool,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            support_threshold: 0.5,
            semantic: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per upstream call, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

/// LLM configuration for the completion collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Per-attempt timeout. Attempts and backoff come from [`RetryConfig`].
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            embeddings: EmbeddingsConfig {
                model: env_nonempty("EMBEDDING_MODEL").unwrap_or(defaults.embeddings.model),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", defaults.embeddings.dimensions),
                batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", defaults.embeddings.batch_size),
                api_key: env_nonempty("EMBEDDING_API_KEY"),
                base_url: env_nonempty("EMBEDDING_BASE_URL"),
                timeout_secs: parse_env_or("EMBEDDING_TIMEOUT", defaults.embeddings.timeout_secs),
                cache_size: parse_env_or("EMBEDDING_CACHE_SIZE", defaults.embeddings.cache_size),
                cache_ttl_secs: parse_env_or(
                    "EMBEDDING_CACHE_TTL_SECS",
                    defaults.embeddings.cache_ttl_secs,
                ),
            },
            chunking: ChunkingConfig {
                chunk_size: parse_env_or("CHUNK_SIZE", defaults.chunking.chunk_size),
                chunk_overlap: parse_env_or("CHUNK_OVERLAP", defaults.chunking.chunk_overlap),
            },
            retrieval: RetrievalConfig {
                top_k: parse_env_or("TOP_K", defaults.retrieval.top_k),
                overfetch_factor: parse_env_or(
                    "OVERFETCH_FACTOR",
                    defaults.retrieval.overfetch_factor,
                ),
                score_weights: parse_env_or("SCORE_WEIGHTS", defaults.retrieval.score_weights),
                staleness_horizon_days: parse_env_or(
                    "STALENESS_HORIZON_DAYS",
                    defaults.retrieval.staleness_horizon_days,
                ),
                default_confidence: parse_env_or(
                    "DEFAULT_CONFIDENCE",
                    defaults.retrieval.default_confidence,
                ),
                index_timeout_ms: parse_env_or(
                    "INDEX_TIMEOUT_MS",
                    defaults.retrieval.index_timeout_ms,
                ),
                similarity: parse_env_or("SIMILARITY_METRIC", defaults.retrieval.similarity),
                ingest_concurrency: parse_env_or(
                    "INGEST_CONCURRENCY",
                    defaults.retrieval.ingest_concurrency,
                ),
            },
            context: ContextConfig {
                budget: parse_env_or("CONTEXT_BUDGET", defaults.context.budget),
                budget_unit: parse_env_or("CONTEXT_BUDGET_UNIT", defaults.context.budget_unit),
                dedup_prefix_chars: parse_env_or(
                    "DEDUP_PREFIX_CHARS",
                    defaults.context.dedup_prefix_chars,
                ),
            },
            grounding: GroundingConfig {
                support_threshold: parse_env_or(
                    "SUPPORT_THRESHOLD",
                    defaults.grounding.support_threshold,
                ),
                semantic: parse_env_or("SEMANTIC_GROUNDING", defaults.grounding.semantic),
            },
            retry: RetryConfig {
                max_attempts: parse_env_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                base_delay_ms: parse_env_or("RETRY_BASE_DELAY_MS", defaults.retry.base_delay_ms),
            },
            llm: env_nonempty("LLM_MODEL").map(|model| LlmConfig {
                model,
                api_key: env_nonempty("LLM_API_KEY"),
                base_url: env_nonempty("LLM_BASE_URL"),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
            }),
        }
    }

    /// Reject settings that would break ranking or chunking invariants.
    pub fn validate(&self) -> Result<()> {
        fn unit_interval(name: &str, value: f64) -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(RagError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )))
            }
        }

        fn nonzero(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                Err(RagError::Config(format!("{name} must be greater than zero")))
            } else {
                Ok(())
            }
        }

        nonzero("embeddings.dimensions", self.embeddings.dimensions)?;
        nonzero("embeddings.batch_size", self.embeddings.batch_size)?;
        nonzero("chunking.chunk_size", self.chunking.chunk_size)?;
        nonzero("retrieval.top_k", self.retrieval.top_k)?;
        nonzero("retrieval.ingest_concurrency", self.retrieval.ingest_concurrency)?;
        nonzero("context.budget", self.context.budget)?;
        nonzero("context.dedup_prefix_chars", self.context.dedup_prefix_chars)?;

        if !(0.0..0.5).contains(&self.chunking.chunk_overlap) {
            return Err(RagError::Config(format!(
                "chunking.chunk_overlap must be within [0, 0.5), got {}",
                self.chunking.chunk_overlap
            )));
        }

        if self.retrieval.overfetch_factor < 3 {
            return Err(RagError::Config(format!(
                "retrieval.overfetch_factor must be at least 3, got {}",
                self.retrieval.overfetch_factor
            )));
        }

        if self.retrieval.staleness_horizon_days == 0 {
            return Err(RagError::Config(
                "retrieval.staleness_horizon_days must be greater than zero".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(RagError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        self.retrieval.score_weights.validate()?;
        unit_interval("retrieval.default_confidence", self.retrieval.default_confidence)?;
        unit_interval("grounding.support_threshold", self.grounding.support_threshold)?;

        Ok(())
    }
}

/// Known embedding providers. `hash` and `local` run in-process, the rest use
/// OpenAI-compatible APIs.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "local", "hash"];

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to local provider
    ("local", model)
}

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}

/// Provider-specific default base URLs
pub fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}
