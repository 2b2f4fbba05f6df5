use serde::{Deserialize, Serialize};

use crate::embedding_cache::{CacheLookup, EmbeddingRecord};
use crate::skill_normalizer::SkillSet;

/// Gates in evaluation order. The first failing gate excludes the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gate {
    HasEmbedding,
    HasSkills,
    MeetsMinScore,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::HasEmbedding => "HAS_EMBEDDING",
            Gate::HasSkills => "HAS_SKILLS",
            Gate::MeetsMinScore => "MEETS_MIN_SCORE",
        }
    }
}

/// Why a candidate was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    NoEmbedding,
    StaleEmbedding,
    EmptySkills,
    BelowMinScore,
}

impl GateRejection {
    pub fn gate(&self) -> Gate {
        match self {
            GateRejection::NoEmbedding | GateRejection::StaleEmbedding => Gate::HasEmbedding,
            GateRejection::EmptySkills => Gate::HasSkills,
            GateRejection::BelowMinScore => Gate::MeetsMinScore,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateRejection::NoEmbedding => "no_embedding",
            GateRejection::StaleEmbedding => "stale_embedding",
            GateRejection::EmptySkills => "empty_skills",
            GateRejection::BelowMinScore => "below_min_score",
        }
    }
}

/// HAS_EMBEDDING: a cached, non-stale vector exists.
pub fn has_embedding(lookup: CacheLookup<&EmbeddingRecord>) -> Result<&EmbeddingRecord, GateRejection> {
    match lookup {
        CacheLookup::Fresh(record) => Ok(record),
        CacheLookup::Stale(_) => Err(GateRejection::StaleEmbedding),
        CacheLookup::Missing => Err(GateRejection::NoEmbedding),
    }
}

/// HAS_SKILLS: the normalized skill set is non-empty.
pub fn has_skills(skills: &SkillSet) -> Result<(), GateRejection> {
    if skills.is_empty() {
        Err(GateRejection::EmptySkills)
    } else {
        Ok(())
    }
}

/// MEETS_MIN_SCORE: final score at or above the request threshold.
pub fn meets_min_score(score: f64, min_score: f64) -> Result<(), GateRejection> {
    if score >= min_score {
        Ok(())
    } else {
        Err(GateRejection::BelowMinScore)
    }
}

/// Aggregate gate counters for one ranking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDiagnostics {
    /// Candidates that entered the pipeline (not skipped by the deadline)
    pub evaluated: usize,
    pub excluded_no_embedding: usize,
    pub excluded_stale_embedding: usize,
    pub excluded_empty_skills: usize,
    pub excluded_below_min_score: usize,
    pub skipped_by_deadline: usize,
}

impl GateDiagnostics {
    pub fn record(&mut self, rejection: GateRejection) {
        match rejection {
            GateRejection::NoEmbedding => self.excluded_no_embedding += 1,
            GateRejection::StaleEmbedding => self.excluded_stale_embedding += 1,
            GateRejection::EmptySkills => self.excluded_empty_skills += 1,
            GateRejection::BelowMinScore => self.excluded_below_min_score += 1,
        }
    }

    pub fn merge(mut self, other: GateDiagnostics) -> Self {
        self.evaluated += other.evaluated;
        self.excluded_no_embedding += other.excluded_no_embedding;
        self.excluded_stale_embedding += other.excluded_stale_embedding;
        self.excluded_empty_skills += other.excluded_empty_skills;
        self.excluded_below_min_score += other.excluded_below_min_score;
        self.skipped_by_deadline += other.skipped_by_deadline;
        self
    }

    pub fn excluded_total(&self) -> usize {
        self.excluded_no_embedding
            + self.excluded_stale_embedding
            + self.excluded_empty_skills
            + self.excluded_below_min_score
    }

    /// Candidates that passed every gate.
    pub fn passed(&self) -> usize {
        self.evaluated.saturating_sub(self.excluded_total())
    }

    /// (rejection label, count) pairs for non-zero counters.
    pub fn exclusions(&self) -> Vec<(GateRejection, usize)> {
        [
            (GateRejection::NoEmbedding, self.excluded_no_embedding),
            (GateRejection::StaleEmbedding, self.excluded_stale_embedding),
            (GateRejection::EmptySkills, self.excluded_empty_skills),
            (GateRejection::BelowMinScore, self.excluded_below_min_score),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}
