use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tm_common::embedding::{EmbeddingProvider, HashEmbeddingProvider, ProviderError};
use tm_common::embedding_cache::population::{
    PopulationCheckpoint, PopulationConfig, run_population,
};
use tm_common::embedding_cache::{
    CacheKey, EmbeddingCache, EmbeddingStore, EntityKind, JsonlEmbeddingStore,
};
use tm_common::matching::{Bm25Params, CorpusHandle, MatchRequest, MatchingEngine};
use tm_common::profile_source::InMemoryProfileSource;
use tm_common::skill_normalizer::{SkillSet, normalize};
use tm_common::{Candidate, JobPosting};

const DIM: usize = 32;

/// Hash vectors, except that anything mentioning cobol is rejected outright.
struct PickyProvider {
    inner: HashEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for PickyProvider {
    fn name(&self) -> &'static str {
        "picky"
    }

    fn version(&self) -> &str {
        "test"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, skills: &SkillSet) -> Result<Vec<f32>, ProviderError> {
        if skills.contains("cobol") {
            return Err(ProviderError::Permanent("unsupported input".into()));
        }
        Ok(self.inner.embed_sync(skills))
    }
}

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(PickyProvider {
        inner: HashEmbeddingProvider::new(DIM),
    })
}

async fn open_cache(store: Arc<dyn EmbeddingStore>) -> EmbeddingCache {
    let cache = EmbeddingCache::new(provider(), store);
    cache.load_from_store().await.expect("load");
    cache
}

fn entities() -> Vec<(CacheKey, SkillSet)> {
    vec![
        (CacheKey::new(1, EntityKind::Candidate), normalize(&["python", "sql"])),
        (CacheKey::new(2, EntityKind::Candidate), normalize(&["cobol"])),
        (CacheKey::new(3, EntityKind::Candidate), normalize(&["rust"])),
        (CacheKey::new(4, EntityKind::Candidate), SkillSet::empty()),
        (CacheKey::new(10, EntityKind::Job), normalize(&["python"])),
    ]
}

fn config(checkpoint: Option<std::path::PathBuf>) -> PopulationConfig {
    PopulationConfig {
        max_attempts: 2,
        base_backoff: Duration::milliseconds(1),
        publish_every: 2,
        checkpoint_path: checkpoint,
    }
}

#[tokio::test]
async fn one_failing_entity_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonlEmbeddingStore::new(dir.path().join("cache.jsonl")));
    let cache = open_cache(store.clone()).await;

    let report = run_population(&cache, entities(), &config(None))
        .await
        .expect("population");

    assert_eq!(report.submitted, 5);
    assert_eq!(report.completed, 3);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "candidate:2");

    let snapshot = cache.snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.get(2, EntityKind::Candidate).is_none());
    assert_eq!(store.load_all().await.expect("reload").len(), 3);
}

#[tokio::test]
async fn rerun_skips_fresh_embeddings_from_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.jsonl");

    let first = open_cache(Arc::new(JsonlEmbeddingStore::new(&path))).await;
    run_population(&first, entities(), &config(None))
        .await
        .expect("first run");

    let second = open_cache(Arc::new(JsonlEmbeddingStore::new(&path))).await;
    assert_eq!(second.snapshot().expect("snapshot").len(), 3);

    let report = run_population(&second, entities(), &config(None))
        .await
        .expect("second run");
    assert_eq!(report.skipped_fresh, 3);
    assert_eq!(report.completed, 0);
}

#[tokio::test]
async fn resumed_run_skips_checkpointed_entities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let checkpoint_path = dir.path().join("population.json");
    let store_path = dir.path().join("cache.jsonl");

    let first = open_cache(Arc::new(JsonlEmbeddingStore::new(&store_path))).await;
    let report = run_population(&first, entities(), &config(Some(checkpoint_path.clone())))
        .await
        .expect("first run");

    // cobol failed, so the checkpoint survives the run
    let checkpoint = PopulationCheckpoint::load(&checkpoint_path)
        .await
        .expect("read checkpoint")
        .expect("checkpoint written");
    assert_eq!(checkpoint.run_id, report.run_id);
    assert_eq!(checkpoint.completed.len(), 3);
    assert_eq!(checkpoint.failed.len(), 1);
    assert_eq!(checkpoint.dimension, DIM);

    let resumed = open_cache(Arc::new(JsonlEmbeddingStore::new(&store_path))).await;
    let report = run_population(&resumed, entities(), &config(Some(checkpoint_path)))
        .await
        .expect("resumed run");
    assert_eq!(report.skipped_checkpointed, 3);
    assert_eq!(report.completed, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.run_id, checkpoint.run_id);
}

#[tokio::test]
async fn checkpoint_without_store_records_reembeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let checkpoint_path = dir.path().join("population.json");

    let first = open_cache(Arc::new(JsonlEmbeddingStore::new(dir.path().join("a.jsonl")))).await;
    run_population(&first, entities(), &config(Some(checkpoint_path.clone())))
        .await
        .expect("first run");

    // a different, empty store: the checkpoint alone is not enough to skip
    let wiped = open_cache(Arc::new(JsonlEmbeddingStore::new(dir.path().join("b.jsonl")))).await;
    let report = run_population(&wiped, entities(), &config(Some(checkpoint_path)))
        .await
        .expect("resumed run");
    assert_eq!(report.skipped_checkpointed, 0);
    assert_eq!(report.completed, 3);

    let snapshot = wiped.snapshot().expect("snapshot");
    assert!(snapshot.get(1, EntityKind::Candidate).is_some());
    assert!(snapshot.get(10, EntityKind::Job).is_some());
}

#[tokio::test]
async fn clean_run_removes_its_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let checkpoint_path = dir.path().join("population.json");
    let cache = open_cache(Arc::new(JsonlEmbeddingStore::new(dir.path().join("cache.jsonl")))).await;

    let healthy: Vec<_> = entities()
        .into_iter()
        .filter(|(key, _)| key.entity_id != 2)
        .collect();
    let report = run_population(&cache, healthy, &config(Some(checkpoint_path.clone())))
        .await
        .expect("population");

    assert!(report.failed.is_empty());
    assert!(
        PopulationCheckpoint::load(&checkpoint_path)
            .await
            .expect("readable")
            .is_none()
    );
}

#[tokio::test]
async fn job_without_skills_still_ranks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(
        open_cache(Arc::new(JsonlEmbeddingStore::new(dir.path().join("cache.jsonl")))).await,
    );

    let candidates = vec![Candidate::new(1, &["python", "sql"]), Candidate::new(3, &["rust"])];
    let jobs = vec![JobPosting::new::<&str>(11, &[])];
    let entities = vec![
        (CacheKey::new(1, EntityKind::Candidate), normalize(&["python", "sql"])),
        (CacheKey::new(3, EntityKind::Candidate), normalize(&["rust"])),
        (CacheKey::new(11, EntityKind::Job), SkillSet::empty()),
    ];
    let report = run_population(&cache, entities, &config(None))
        .await
        .expect("population");
    assert_eq!(report.completed, 3);

    let corpus = Arc::new(CorpusHandle::new(Bm25Params::default()));
    corpus.rebuild(&candidates);
    let engine = MatchingEngine::new(corpus, cache, Default::default()).expect("engine");
    let source = InMemoryProfileSource::new(candidates, jobs);

    let outcome = engine
        .rank_for_job(&MatchRequest::new(11, 0.0, 10), &source)
        .expect("rank");
    assert!(outcome.empty_reason.is_none());
    assert_eq!(outcome.matches.len(), 2);
    for m in &outcome.matches {
        assert_eq!(m.components.keyword, 0.0);
        assert_eq!(m.components.exact_overlap, 0.0);
        assert_eq!(m.components.rarity_weighted_overlap, 0.0);
        assert!(m.final_score.is_finite());
    }
}

#[tokio::test]
async fn populated_cache_feeds_the_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(
        open_cache(Arc::new(JsonlEmbeddingStore::new(dir.path().join("cache.jsonl")))).await,
    );

    let candidates = vec![
        Candidate::new(1, &["python", "sql"]),
        Candidate::new(2, &["cobol"]),
        Candidate::new(3, &["rust"]),
    ];
    let jobs = vec![JobPosting::new(10, &["python"])];
    run_population(&cache, entities(), &config(None))
        .await
        .expect("population");

    let corpus = Arc::new(CorpusHandle::new(Bm25Params::default()));
    corpus.rebuild(&candidates);
    let engine = MatchingEngine::new(corpus, cache, Default::default()).expect("engine");
    let source = InMemoryProfileSource::new(candidates, jobs);

    let outcome = engine
        .rank_for_job(&MatchRequest::new(10, 0.0, 10), &source)
        .expect("rank");
    assert_eq!(outcome.matches[0].candidate_id, 1);
    assert_eq!(outcome.diagnostics.excluded_no_embedding, 1);
    assert!(outcome.matches.iter().all(|m| m.candidate_id != 2));
}
