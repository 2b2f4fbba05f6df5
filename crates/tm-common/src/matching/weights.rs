use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const SUM_TOLERANCE: f64 = 1e-6;

/// Hybrid fusion weights (ranking)
/// semantic を主軸に、keyword / exact / rarity で補正する
pub const DEFAULT_WEIGHTS: HybridWeights = HybridWeights {
    semantic: 0.40,
    keyword: 0.25,
    exact_overlap: 0.20,
    rarity: 0.15,
};

/// Weights used by `MatchStrategy::SemanticOnly`.
pub const SEMANTIC_ONLY_WEIGHTS: HybridWeights = HybridWeights {
    semantic: 1.0,
    keyword: 0.0,
    exact_overlap: 0.0,
    rarity: 0.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub exact_overlap: f64,
    pub rarity: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

impl HybridWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.keyword + self.exact_overlap + self.rarity
    }

    fn components(&self) -> [(&'static str, f64); 4] {
        [
            ("semantic", self.semantic),
            ("keyword", self.keyword),
            ("exact_overlap", self.exact_overlap),
            ("rarity", self.rarity),
        ]
    }

    /// Each weight finite and non-negative, total 1.0 within 1e-6.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in self.components() {
            if !value.is_finite() {
                return Err(EngineError::InvalidWeights(format!("{name} is not finite")));
            }
            if value < 0.0 {
                return Err(EngineError::InvalidWeights(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(EngineError::InvalidWeights(format!(
                "weights must sum to 1.0, got {sum:.6}"
            )));
        }

        Ok(())
    }
}
