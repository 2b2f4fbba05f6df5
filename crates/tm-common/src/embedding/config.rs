use serde::{Deserialize, Serialize};

use crate::config::{env_parse, env_string};

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Provider name passed to `create_provider` ("hash" | "http")
    pub provider: String,
    /// Vector length (powers of two recommended: 256, 512, 1024)
    pub dimension: usize,
    /// Base URL of an OpenAI-compatible API; `/embeddings` is appended
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// In-request retries for the HTTP provider before the failure is handed
    /// back to the population queue
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".into(),
            dimension: 256,
            endpoint: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            api_key: String::new(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: env_string("TM_EMBEDDING_PROVIDER", &defaults.provider).to_ascii_lowercase(),
            dimension: env_parse("TM_EMBEDDING_DIMENSION", defaults.dimension).max(1),
            endpoint: env_string("TM_EMBEDDING_ENDPOINT", &defaults.endpoint),
            model: env_string("TM_EMBEDDING_MODEL", &defaults.model),
            api_key: std::env::var("TM_EMBEDDING_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or_default(),
            timeout_secs: env_parse("TM_EMBEDDING_TIMEOUT_SECS", defaults.timeout_secs),
            max_retries: env_parse("TM_EMBEDDING_MAX_RETRIES", defaults.max_retries),
        }
    }
}

/// Linear map from raw cosine similarity onto the `[0, 1]` semantic signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticScaling {
    pub score_min: f64,
    pub score_max: f64,
}

impl Default for SemanticScaling {
    fn default() -> Self {
        Self {
            score_min: 0.0,
            score_max: 1.0,
        }
    }
}

impl SemanticScaling {
    /// Maps a raw score to 0.0..=1.0.
    /// When score_max <= score_min only the clamp is applied.
    pub fn normalize_score(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }

        let min = self.score_min;
        let max = self.score_max;

        if max <= min {
            return raw.clamp(0.0, 1.0);
        }

        ((raw - min) / (max - min)).clamp(0.0, 1.0)
    }
}
