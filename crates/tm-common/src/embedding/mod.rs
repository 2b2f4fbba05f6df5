pub mod config;
pub mod hash_provider;
pub mod http_provider;
pub mod similarity;
pub mod tokenizer;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::skill_normalizer::SkillSet;
pub use config::{EmbeddingConfig, SemanticScaling};
pub use hash_provider::HashEmbeddingProvider;
pub use http_provider::HttpEmbeddingProvider;
pub use similarity::cosine_similarity;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transient failure (timeout, 429, 5xx, transport). Worth retrying later.
    #[error("retryable provider failure: {message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The provider will never succeed for this input or configuration.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ProviderError::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

/// External embedding provider.
///
/// Implementations:
/// - HashEmbeddingProvider: feature hashing, deterministic, no network
/// - HttpEmbeddingProvider: OpenAI-compatible `/embeddings` endpoint
///
/// Only the out-of-band population path calls `embed`; ranking requests read
/// vectors from the embedding cache instead.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Implementation name ("hash", "http"), stored on each record.
    fn name(&self) -> &'static str;

    /// Model generation, stored on each record for auditing.
    fn version(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embeds a normalized skill set.
    async fn embed(&self, skills: &SkillSet) -> Result<Vec<f32>, ProviderError>;
}

/// Builds the provider named by `config.provider`.
///
/// Unknown names fall back to the hash provider. A misconfigured HTTP provider
/// is an error rather than a silent fallback, since its vectors would not be
/// comparable with an existing cache.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>, ProviderError> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbeddingProvider::new(config.dimension))),
        "http" | "openai" => Ok(Box::new(HttpEmbeddingProvider::from_config(config)?)),
        other => {
            warn!(provider = other, "unknown embedding provider; using hash provider");
            Ok(Box::new(HashEmbeddingProvider::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_hash_provider_by_default() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).expect("hash provider always builds");
        assert_eq!(provider.name(), "hash");
        assert_eq!(provider.dimension(), config.dimension);
    }

    #[test]
    fn factory_falls_back_for_unknown_names() {
        let config = EmbeddingConfig {
            provider: "onnx".into(),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).expect("fallback provider");
        assert_eq!(provider.name(), "hash");
    }

    #[test]
    fn factory_rejects_http_provider_without_endpoint() {
        let config = EmbeddingConfig {
            provider: "http".into(),
            endpoint: String::new(),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().expect("missing endpoint");
        assert!(!err.is_retryable());
    }
}
