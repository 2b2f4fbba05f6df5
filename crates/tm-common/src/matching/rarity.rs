use std::collections::HashMap;

use crate::skill_normalizer::SkillSet;

/// Document frequency per canonical skill over the candidate corpus.
///
/// Built once per corpus snapshot; never updated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStatistics {
    corpus_size: usize,
    doc_freqs: HashMap<String, usize>,
}

impl CorpusStatistics {
    pub fn compute(corpus: &[SkillSet]) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        for skills in corpus {
            // SkillSet is de-duplicated, so each skill counts once per document
            for skill in skills {
                *doc_freqs.entry(skill.clone()).or_default() += 1;
            }
        }
        Self {
            corpus_size: corpus.len(),
            doc_freqs,
        }
    }

    pub fn corpus_size(&self) -> usize {
        self.corpus_size
    }

    pub fn doc_freq(&self, skill: &str) -> usize {
        self.doc_freqs.get(skill).copied().unwrap_or(0)
    }
}

/// IDF-style weight per skill: `ln((N + 1) / (df + 1)) + 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RarityWeights {
    corpus_size: usize,
    weights: HashMap<String, f64>,
}

impl RarityWeights {
    pub fn compute(stats: &CorpusStatistics) -> Self {
        let weights = stats
            .doc_freqs
            .iter()
            .map(|(skill, df)| (skill.clone(), rarity_weight(stats.corpus_size, *df)))
            .collect();
        Self {
            corpus_size: stats.corpus_size,
            weights,
        }
    }

    /// Skills absent from the corpus get the df = 0 weight.
    pub fn weight(&self, skill: &str) -> f64 {
        self.weights
            .get(skill)
            .copied()
            .unwrap_or_else(|| rarity_weight(self.corpus_size, 0))
    }

    /// Σw(job ∩ candidate) / Σw(job); 0.0 for an empty job.
    pub fn weighted_overlap(&self, job: &SkillSet, candidate: &SkillSet) -> f64 {
        let mut total = 0.0;
        let mut matched = 0.0;
        for skill in job {
            let w = self.weight(skill);
            total += w;
            if candidate.contains(skill) {
                matched += w;
            }
        }

        if total <= 0.0 {
            return 0.0;
        }
        (matched / total).clamp(0.0, 1.0)
    }
}

fn rarity_weight(corpus_size: usize, df: usize) -> f64 {
    ((corpus_size as f64 + 1.0) / (df as f64 + 1.0)).ln() + 1.0
}
