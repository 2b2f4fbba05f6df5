use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::combiner::ComponentScores;
use super::rarity::RarityWeights;
use crate::skill_normalizer::SkillSet;

const EXPLAINED_SKILLS: usize = 3;
const MISSING_SKILLS_LIMIT: usize = 5;

/// Candidate that passed every gate, before ordering and truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate_id: i64,
    pub final_score: f64,
    pub components: ComponentScores,
    pub matched_skills: SkillSet,
    /// Every job skill the candidate lacks, in job order
    pub missing_skills: SkillSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub candidate_id: i64,
    pub job_id: i64,
    pub final_score: f64,
    pub components: ComponentScores,
    pub matched_skills: SkillSet,
    /// At most five, rarest first
    pub missing_skills: SkillSet,
    pub explanation: String,
}

/// Score descending, candidate id ascending on ties.
pub fn compare_scored(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

/// Orders, truncates to `top_k`, and decorates the survivors with an
/// explanation and their rarest missing skills.
pub fn rank(
    mut scored: Vec<ScoredCandidate>,
    job_id: i64,
    top_k: usize,
    rarity: &RarityWeights,
) -> Vec<RankedMatch> {
    scored.sort_by(compare_scored);
    scored.truncate(top_k);

    scored
        .into_iter()
        .map(|candidate| RankedMatch {
            candidate_id: candidate.candidate_id,
            job_id,
            final_score: candidate.final_score,
            components: candidate.components,
            explanation: explain(&candidate.matched_skills, candidate.final_score),
            missing_skills: rarest_missing(&candidate.missing_skills, rarity, MISSING_SKILLS_LIMIT),
            matched_skills: candidate.matched_skills,
        })
        .collect()
}

/// "Matched python, sql, docker and 2 more (score 0.81)."
pub fn explain(matched: &SkillSet, final_score: f64) -> String {
    if matched.is_empty() {
        return format!("No direct skill overlap; semantic-only match (score {final_score:.2}).");
    }

    let cited: Vec<&str> = matched
        .iter()
        .take(EXPLAINED_SKILLS)
        .map(String::as_str)
        .collect();
    let rest = matched.len().saturating_sub(EXPLAINED_SKILLS);

    if rest > 0 {
        format!(
            "Matched {} and {rest} more (score {final_score:.2}).",
            cited.join(", ")
        )
    } else {
        format!("Matched {} (score {final_score:.2}).", cited.join(", "))
    }
}

/// Highest-rarity missing skills; ties keep job order.
pub fn rarest_missing(missing: &SkillSet, rarity: &RarityWeights, limit: usize) -> SkillSet {
    let mut weighted: Vec<(&String, f64)> = missing
        .iter()
        .map(|skill| (skill, rarity.weight(skill)))
        .collect();
    // sort_by is stable
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

    SkillSet::from_canonical(
        weighted
            .into_iter()
            .take(limit)
            .map(|(skill, _)| skill.clone()),
    )
}
