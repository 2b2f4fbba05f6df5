use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use siphasher::sip::SipHasher13;

use super::{EmbeddingProvider, ProviderError, tokenizer};
use crate::skill_normalizer::SkillSet;

/// 固定 seed（決定論的 hash のため）
/// Changing these changes every vector: bump `version()` and re-populate the cache.
const HASH_SEED_K0: u64 = 0x0123_4567_89ab_cdef;
const HASH_SEED_K1: u64 = 0xfedc_ba98_7654_3210;

/// Feature-hashing embedding provider.
///
/// - no model, no network: vectors are a pure function of the skill set
/// - O(n) in the number of tokens
/// - SipHash-1-3 with a fixed seed keeps vectors stable across Rust versions
///
/// Used for local development, tests, and as the fallback provider.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_token(&self, token: &str) -> usize {
        let mut hasher = SipHasher13::new_with_keys(HASH_SEED_K0, HASH_SEED_K1);
        token.hash(&mut hasher);
        (hasher.finish() % self.dimension as u64) as usize
    }

    /// Deterministic vector for a skill set; exposed for callers that need the
    /// vector without going through the async trait.
    pub fn embed_sync(&self, skills: &SkillSet) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for wt in tokenizer::tokenize_skills(skills) {
            let idx = self.hash_token(&wt.token);
            // Sign hashing keeps collisions from always adding up
            let sign = if self.hash_token(&format!("{}_sign", wt.token)) % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            vector[idx] += sign * wt.weight;
        }

        // L2正規化
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn version(&self) -> &str {
        // bump when the token layout or hash function changes
        "v1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, skills: &SkillSet) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(skills))
    }
}
