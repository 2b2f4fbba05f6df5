use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use super::keyword_index::{Bm25Params, KeywordIndex};
use super::rarity::{CorpusStatistics, RarityWeights};
use crate::Candidate;
use crate::profile_source::{ProfileSource, ProfileSourceError};
use crate::skill_normalizer::SkillSet;
use crate::snapshot::SnapshotCell;

#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub candidate_id: i64,
    pub skills: SkillSet,
    /// Fingerprint of `skills`, checked against cached embeddings
    pub fingerprint: String,
}

/// Candidate skill sets with their keyword index and rarity weights, built
/// together so a ranking pass sees one consistent corpus version.
#[derive(Debug)]
pub struct CorpusSnapshot {
    entries: Vec<CorpusEntry>,
    index: KeywordIndex,
    stats: CorpusStatistics,
    rarity: RarityWeights,
    version: u64,
    built_at: DateTime<Utc>,
}

impl CorpusSnapshot {
    /// Entries are ordered by candidate id; a repeated id keeps its last record.
    pub fn build(candidates: &[Candidate], params: Bm25Params, version: u64) -> Self {
        let by_id: BTreeMap<i64, &Candidate> = candidates.iter().map(|c| (c.id, c)).collect();

        let entries: Vec<CorpusEntry> = by_id
            .into_values()
            .map(|candidate| {
                let skills = candidate.skill_set();
                CorpusEntry {
                    candidate_id: candidate.id,
                    fingerprint: skills.fingerprint(),
                    skills,
                }
            })
            .collect();

        let skill_sets: Vec<SkillSet> = entries.iter().map(|e| e.skills.clone()).collect();
        let index = KeywordIndex::build(&skill_sets, params);
        let stats = CorpusStatistics::compute(&skill_sets);
        let rarity = RarityWeights::compute(&stats);

        Self {
            entries,
            index,
            stats,
            rarity,
            version,
            built_at: Utc::now(),
        }
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> &KeywordIndex {
        &self.index
    }

    pub fn statistics(&self) -> &CorpusStatistics {
        &self.stats
    }

    pub fn rarity(&self) -> &RarityWeights {
        &self.rarity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

/// Shared, rebuild-only corpus. Rebuilds are full and synchronous; readers
/// keep whatever snapshot they already hold.
pub struct CorpusHandle {
    cell: SnapshotCell<CorpusSnapshot>,
    params: Bm25Params,
}

impl CorpusHandle {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            cell: SnapshotCell::empty(),
            params,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<CorpusSnapshot>> {
        self.cell.load()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.is_loaded()
    }

    pub fn rebuild(&self, candidates: &[Candidate]) -> Arc<CorpusSnapshot> {
        let started = Instant::now();
        let params = self.params;
        let snapshot = self.cell.update(|prev| {
            let version = prev.map_or(1, |p| p.version + 1);
            CorpusSnapshot::build(candidates, params, version)
        });
        info!(
            version = snapshot.version(),
            candidates = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "corpus rebuilt"
        );
        snapshot
    }

    pub fn rebuild_from_source(
        &self,
        source: &dyn ProfileSource,
    ) -> Result<Arc<CorpusSnapshot>, ProfileSourceError> {
        let candidates = source.candidates()?;
        Ok(self.rebuild(&candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_consistent_snapshot() {
        let handle = CorpusHandle::new(Bm25Params::default());
        assert!(handle.snapshot().is_none());

        let snapshot = handle.rebuild(&[
            Candidate::new(3, &["py", "SQL"]),
            Candidate::new(1, &["rust"]),
            Candidate::new(3, &["python"]),
        ]);

        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.len(), 2);
        let ids: Vec<i64> = snapshot.entries().iter().map(|e| e.candidate_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(snapshot.entries()[1].skills.as_slice(), &["python"]);
        assert_eq!(snapshot.index().len(), 2);
        assert_eq!(snapshot.statistics().corpus_size(), 2);
        assert_eq!(
            snapshot.entries()[0].fingerprint,
            snapshot.entries()[0].skills.fingerprint()
        );
    }

    #[test]
    fn old_snapshot_survives_rebuild() {
        let handle = CorpusHandle::new(Bm25Params::default());
        let first = handle.rebuild(&[Candidate::new(1, &["rust"])]);
        let second = handle.rebuild(&[Candidate::new(1, &["rust"]), Candidate::new(2, &["go"])]);

        assert_eq!(first.len(), 1);
        assert_eq!(first.statistics().corpus_size(), 1);
        assert_eq!(second.version(), 2);
        assert_eq!(handle.snapshot().expect("loaded").len(), 2);
    }
}
