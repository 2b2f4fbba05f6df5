use std::collections::BTreeMap;

use super::combiner::ComponentScores;

/// Optional downstream re-ranking model (e.g. a gradient-boosted classifier).
///
/// Receives the hybrid component scores plus auxiliary features and returns a
/// match probability in 0.0..=1.0 that replaces the hybrid score.
pub trait RerankModel: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, components: &ComponentScores, features: &BTreeMap<String, f64>) -> f64;
}

/// Auxiliary features handed to the re-ranker for one candidate.
pub fn rerank_features(
    hybrid_score: f64,
    job_skill_count: usize,
    candidate_skill_count: usize,
    matched_count: usize,
) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("hybrid_score".to_string(), hybrid_score),
        ("job_skill_count".to_string(), job_skill_count as f64),
        ("candidate_skill_count".to_string(), candidate_skill_count as f64),
        ("matched_skill_count".to_string(), matched_count as f64),
    ])
}

/// Runs the model, falling back to `hybrid_score` when the prediction is not
/// a finite number. Output is clamped to 0.0..=1.0.
pub fn apply_rerank(
    model: &dyn RerankModel,
    components: &ComponentScores,
    features: &BTreeMap<String, f64>,
    hybrid_score: f64,
) -> f64 {
    let probability = model.predict(components, features);
    if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        hybrid_score
    }
}
