use serde::{Deserialize, Serialize};

use super::weights::HybridWeights;
use crate::skill_normalizer::SkillSet;

/// Per-signal breakdown of one candidate's score, every field in 0.0..=1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub semantic: f64,
    pub keyword: f64,
    pub exact_overlap: f64,
    pub rarity_weighted_overlap: f64,
}

impl ComponentScores {
    /// Weighted fusion of the four signals.
    pub fn combine(&self, weights: &HybridWeights) -> f64 {
        combine(
            self.semantic,
            self.keyword,
            self.exact_overlap,
            self.rarity_weighted_overlap,
            weights,
        )
    }
}

/// Fuses the four signals into a final score clamped to 0.0..=1.0.
///
/// Inputs are clamped first so a misbehaving signal cannot push the result out
/// of range. Non-finite inputs count as 0.0.
pub fn combine(
    semantic: f64,
    keyword: f64,
    exact: f64,
    rarity: f64,
    weights: &HybridWeights,
) -> f64 {
    let total = unit(semantic) * weights.semantic
        + unit(keyword) * weights.keyword
        + unit(exact) * weights.exact_overlap
        + unit(rarity) * weights.rarity;

    unit(total)
}

/// |job ∩ candidate| / |job|; 0.0 when the job lists no skills.
pub fn exact_overlap(job: &SkillSet, candidate: &SkillSet) -> f64 {
    if job.is_empty() {
        return 0.0;
    }
    job.intersection(candidate).len() as f64 / job.len() as f64
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::weights::{DEFAULT_WEIGHTS, SEMANTIC_ONLY_WEIGHTS};
    use crate::skill_normalizer::normalize;

    #[test]
    fn combines_with_default_weights() {
        let score = combine(1.0, 0.5, 0.5, 0.0, &DEFAULT_WEIGHTS);
        let expected = 0.40 + 0.125 + 0.10;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn all_ones_give_one_and_all_zeros_give_zero() {
        assert!((combine(1.0, 1.0, 1.0, 1.0, &DEFAULT_WEIGHTS) - 1.0).abs() < 1e-9);
        assert_eq!(combine(0.0, 0.0, 0.0, 0.0, &DEFAULT_WEIGHTS), 0.0);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let score = combine(3.0, -1.0, f64::NAN, 2.0, &DEFAULT_WEIGHTS);
        assert!((0.0..=1.0).contains(&score));
        assert!((score - (0.40 + 0.15)).abs() < 1e-9);
    }

    #[test]
    fn semantic_only_weights_pass_semantic_through() {
        let components = ComponentScores {
            semantic: 0.37,
            keyword: 1.0,
            exact_overlap: 1.0,
            rarity_weighted_overlap: 1.0,
        };
        assert!((components.combine(&SEMANTIC_ONLY_WEIGHTS) - 0.37).abs() < 1e-9);
    }

    #[test]
    fn exact_overlap_is_fraction_of_job_skills() {
        // job [python, sql], candidate [python, excel]
        let job = normalize(&["python", "sql"]);
        let candidate = normalize(&["python", "excel"]);
        assert!((exact_overlap(&job, &candidate) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn exact_overlap_is_zero_for_empty_job() {
        let candidate = normalize(&["python"]);
        assert_eq!(exact_overlap(&SkillSet::empty(), &candidate), 0.0);
    }
}
