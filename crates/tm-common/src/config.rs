use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::embedding::{EmbeddingConfig, SemanticScaling};
use crate::error::ConfigError;
use crate::matching::{
    Bm25Params, DEFAULT_WEIGHTS, HybridWeights, MatchRequest, MatchStrategy, MatchingEngineConfig,
};

/// Parses `key` into `T`, falling back to `default` when unset or unparsable.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "unparsable environment value; using default");
                default
            }
        },
        _ => default,
    }
}

pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Ranking defaults resolved from `TM_*` environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_score: f64,
    pub top_k: usize,
    pub weights: HybridWeights,
    pub bm25: Bm25Params,
    pub scaling: SemanticScaling,
    pub strategy: MatchStrategy,
    pub deadline: Option<Duration>,
    pub embedding: EmbeddingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            top_k: 20,
            weights: DEFAULT_WEIGHTS,
            bm25: Bm25Params::default(),
            scaling: SemanticScaling::default(),
            strategy: MatchStrategy::Hybrid,
            deadline: None,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let strategy_raw = env_string("TM_STRATEGY", defaults.strategy.as_str());
        let strategy = strategy_raw
            .parse::<MatchStrategy>()
            .map_err(|message| ConfigError::Invalid {
                key: "TM_STRATEGY",
                message,
            })?;

        let deadline_ms: u64 = env_parse("TM_DEADLINE_MS", 0);

        let config = Self {
            min_score: env_parse("TM_MIN_SCORE", defaults.min_score),
            top_k: env_parse("TM_TOP_K", defaults.top_k),
            weights: HybridWeights {
                semantic: env_parse("TM_WEIGHT_SEMANTIC", defaults.weights.semantic),
                keyword: env_parse("TM_WEIGHT_KEYWORD", defaults.weights.keyword),
                exact_overlap: env_parse("TM_WEIGHT_EXACT", defaults.weights.exact_overlap),
                rarity: env_parse("TM_WEIGHT_RARITY", defaults.weights.rarity),
            },
            bm25: Bm25Params {
                k1: env_parse("TM_BM25_K1", defaults.bm25.k1),
                b: env_parse("TM_BM25_B", defaults.bm25.b),
                normalization: env_parse("TM_BM25_NORMALIZATION", defaults.bm25.normalization),
            },
            scaling: SemanticScaling {
                score_min: env_parse("TM_SEMANTIC_SCORE_MIN", defaults.scaling.score_min),
                score_max: env_parse("TM_SEMANTIC_SCORE_MAX", defaults.scaling.score_max),
            },
            strategy,
            deadline: (deadline_ms > 0).then(|| Duration::from_millis(deadline_ms)),
            embedding: EmbeddingConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_score.is_finite() || !(0.0..=1.0).contains(&self.min_score) {
            return Err(ConfigError::Invalid {
                key: "TM_MIN_SCORE",
                message: format!("must be within 0..=1, got {}", self.min_score),
            });
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "TM_TOP_K",
                message: "must be > 0".into(),
            });
        }
        self.weights.validate()?;
        self.bm25.validate()?;
        Ok(())
    }

    pub fn engine_config(&self) -> MatchingEngineConfig {
        MatchingEngineConfig {
            weights: self.weights,
            scaling: self.scaling,
            default_deadline: self.deadline,
        }
    }

    /// Request for `job_id` using the configured defaults.
    pub fn request(&self, job_id: i64) -> MatchRequest {
        MatchRequest {
            job_id,
            min_score: self.min_score,
            top_k: self.top_k,
            weights: None,
            strategy: self.strategy,
            deadline: self.deadline,
        }
    }
}
