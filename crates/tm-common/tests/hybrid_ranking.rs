use std::sync::Arc;

use chrono::Utc;
use tm_common::embedding::HashEmbeddingProvider;
use tm_common::embedding_cache::{
    CacheKey, EmbeddingCache, EmbeddingRecord, EntityKind, InMemoryEmbeddingStore,
};
use tm_common::matching::{
    Bm25Params, CorpusHandle, CorpusStatistics, EmptyReason, MatchRequest, MatchingEngine,
    MatchingEngineConfig, RarityWeights,
};
use tm_common::profile_source::InMemoryProfileSource;
use tm_common::skill_normalizer::{SkillSet, normalize};
use tm_common::{Candidate, JobPosting};

const DIM: usize = 128;

struct Fixture {
    engine: MatchingEngine,
    source: InMemoryProfileSource,
    cache: Arc<EmbeddingCache>,
    corpus: Arc<CorpusHandle>,
}

async fn fixture_with_records(
    candidates: Vec<Candidate>,
    jobs: Vec<JobPosting>,
    seeded: Vec<EmbeddingRecord>,
) -> Fixture {
    let cache = Arc::new(EmbeddingCache::new(
        Arc::new(HashEmbeddingProvider::new(DIM)),
        Arc::new(InMemoryEmbeddingStore::with_records(seeded)),
    ));
    cache.load_from_store().await.expect("load cache");

    for candidate in candidates.iter().filter(|c| !c.skill_set().is_empty()) {
        cache
            .put(candidate.id, EntityKind::Candidate, &candidate.skill_set())
            .await
            .expect("embed candidate");
    }
    for job in &jobs {
        cache
            .put(job.id, EntityKind::Job, &job.skill_set())
            .await
            .expect("embed job");
    }

    let corpus = Arc::new(CorpusHandle::new(Bm25Params::default()));
    corpus.rebuild(&candidates);

    let engine = MatchingEngine::new(corpus.clone(), cache.clone(), MatchingEngineConfig::default())
        .expect("engine");
    Fixture {
        engine,
        source: InMemoryProfileSource::new(candidates, jobs),
        cache,
        corpus,
    }
}

async fn fixture(candidates: Vec<Candidate>, jobs: Vec<JobPosting>) -> Fixture {
    fixture_with_records(candidates, jobs, Vec::new()).await
}

fn record_for(id: i64, kind: EntityKind, vector: Vec<f32>, skills: &SkillSet) -> EmbeddingRecord {
    EmbeddingRecord {
        entity_id: id,
        entity_kind: kind,
        vector,
        content_fingerprint: skills.fingerprint(),
        provider: "hash".into(),
        provider_version: "v1".into(),
        computed_at: Utc::now(),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn aliases_normalize_to_canonical_skills() {
    let skills = normalize(&["ML", "py", "SQL"]);
    assert_eq!(
        skills.into_vec(),
        strings(&["machine learning", "python", "sql"])
    );
}

#[tokio::test]
async fn partial_overlap_reports_matched_and_missing() {
    let fx = fixture(
        vec![Candidate::new(1, &["python", "excel"])],
        vec![JobPosting::new(10, &["python", "sql"])],
    )
    .await;

    let outcome = fx
        .engine
        .rank_for_job(&MatchRequest::new(10, 0.0, 5), &fx.source)
        .expect("rank");

    let m = &outcome.matches[0];
    assert!((m.components.exact_overlap - 0.5).abs() < 1e-9);
    assert_eq!(m.matched_skills.as_slice(), &["python"]);
    assert_eq!(m.missing_skills.as_slice(), &["sql"]);
    assert!(m.explanation.starts_with("Matched python"));
}

#[tokio::test]
async fn empty_skill_candidate_never_ranks() {
    let job_skills = normalize(&["python", "sql"]);
    let job_vector = HashEmbeddingProvider::new(DIM).embed_sync(&job_skills);
    // same vector as the job, so the semantic signal alone would rank it first
    let seeded = vec![record_for(
        3,
        EntityKind::Candidate,
        job_vector,
        &SkillSet::empty(),
    )];

    let fx = fixture_with_records(
        vec![
            Candidate::new(1, &["python"]),
            Candidate::new(3, &[] as &[&str]),
        ],
        vec![JobPosting::new(10, &["python", "sql"])],
        seeded,
    )
    .await;

    let outcome = fx
        .engine
        .rank_for_job(&MatchRequest::new(10, 0.0, 10), &fx.source)
        .expect("rank");

    assert!(outcome.matches.iter().all(|m| m.candidate_id != 3));
    assert_eq!(outcome.diagnostics.excluded_empty_skills, 1);
    assert_eq!(outcome.total_matches, 1);
}

#[test]
fn rare_skills_outweigh_common_ones() {
    let mut corpus: Vec<SkillSet> = Vec::with_capacity(1000);
    for i in 0..1000 {
        let mut raw = vec![format!("filler{}", i % 7)];
        if i < 900 {
            raw.push("communication".into());
        }
        if i == 999 {
            raw.push("blockchain".into());
        }
        corpus.push(normalize(&raw));
    }

    let stats = CorpusStatistics::compute(&corpus);
    assert_eq!(stats.doc_freq("communication"), 900);
    assert_eq!(stats.doc_freq("blockchain"), 1);

    let rarity = RarityWeights::compute(&stats);
    assert!(rarity.weight("blockchain") > rarity.weight("communication"));

    let job = normalize(&["blockchain", "communication"]);
    let rare_holder = normalize(&["blockchain"]);
    let common_holder = normalize(&["communication"]);
    assert!(
        rarity.weighted_overlap(&job, &rare_holder) > rarity.weighted_overlap(&job, &common_holder)
    );
}

#[tokio::test]
async fn top_k_truncates_sorted_results() {
    let candidates: Vec<Candidate> = (1..=50)
        .map(|id| {
            let extra = format!("tool{id}");
            Candidate::new(id, &["python", extra.as_str()])
        })
        .collect();
    let fx = fixture(candidates, vec![JobPosting::new(500, &["python", "sql"])]).await;

    let outcome = fx
        .engine
        .rank_for_job(&MatchRequest::new(500, 0.0, 10), &fx.source)
        .expect("rank");

    assert_eq!(outcome.total_matches, 50);
    assert_eq!(outcome.matches.len(), 10);
    for pair in outcome.matches.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score);
        if pair[0].final_score == pair[1].final_score {
            assert!(pair[0].candidate_id < pair[1].candidate_id);
        }
    }
}

fn mixed_candidates() -> Vec<Candidate> {
    vec![
        Candidate::new(1, &["python", "sql", "docker"]),
        Candidate::new(2, &["python", "excel"]),
        Candidate::new(3, &["java", "spring", "sql"]),
        Candidate::new(4, &["rust", "kubernetes"]),
        Candidate::new(5, &["py", "postgres", "aws"]),
        Candidate::new(6, &["communication"]),
    ]
}

#[tokio::test]
async fn raising_min_score_never_adds_results() {
    let fx = fixture(
        mixed_candidates(),
        vec![JobPosting::new(10, &["python", "sql", "aws"])],
    )
    .await;

    let mut previous = usize::MAX;
    for step in 0..=10 {
        let min_score = f64::from(step) / 10.0;
        let outcome = fx
            .engine
            .rank_for_job(&MatchRequest::new(10, min_score, 100), &fx.source)
            .expect("rank");
        assert!(outcome.total_matches <= previous, "min_score {min_score}");
        assert!(outcome.matches.iter().all(|m| m.final_score >= min_score));
        previous = outcome.total_matches;
    }
}

#[tokio::test]
async fn repeated_queries_are_identical() {
    let fx = fixture(
        mixed_candidates(),
        vec![JobPosting::new(10, &["python", "sql"])],
    )
    .await;
    let request = MatchRequest::new(10, 0.0, 4);

    let first = fx.engine.rank_for_job(&request, &fx.source).expect("rank");
    for _ in 0..5 {
        let again = fx.engine.rank_for_job(&request, &fx.source).expect("rank");
        assert_eq!(again.matches, first.matches);
        assert_eq!(again.total_matches, first.total_matches);
    }
}

#[tokio::test]
async fn results_stay_in_range_and_matched_within_intersection() {
    let fx = fixture(
        mixed_candidates(),
        vec![JobPosting::new(10, &["python", "sql", "docker", "aws"])],
    )
    .await;
    let job_skills = normalize(&["python", "sql", "docker", "aws"]);

    let outcome = fx
        .engine
        .rank_for_job(&MatchRequest::new(10, 0.0, 100), &fx.source)
        .expect("rank");
    assert!(!outcome.matches.is_empty());

    let candidates = mixed_candidates();
    for m in &outcome.matches {
        assert!((0.0..=1.0).contains(&m.final_score));
        let candidate = candidates
            .iter()
            .find(|c| c.id == m.candidate_id)
            .expect("known candidate");
        let shared = job_skills.intersection(&candidate.skill_set());
        assert!(m.matched_skills.iter().all(|s| shared.contains(s)));
        assert!(m.missing_skills.len() <= 5);
    }
}

#[tokio::test]
async fn stale_candidate_embedding_is_excluded_and_counted() {
    let fx = fixture(
        vec![Candidate::new(1, &["python"]), Candidate::new(2, &["python"])],
        vec![JobPosting::new(10, &["python"])],
    )
    .await;

    // candidate 2 changed skills after its vector was computed
    fx.corpus.rebuild(&[
        Candidate::new(1, &["python"]),
        Candidate::new(2, &["python", "sql"]),
    ]);

    let outcome = fx
        .engine
        .rank_for_job(&MatchRequest::new(10, 0.0, 10), &fx.source)
        .expect("rank");

    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].candidate_id, 1);
    assert_eq!(outcome.diagnostics.excluded_stale_embedding, 1);

    let edited = normalize(&["python", "sql"]);
    let stale = fx
        .cache
        .stale_entities([(CacheKey::new(2, EntityKind::Candidate), &edited)])
        .expect("cache loaded");
    assert_eq!(stale, vec![CacheKey::new(2, EntityKind::Candidate)]);
}

#[tokio::test]
async fn job_without_fresh_embedding_returns_reason() {
    let fx = fixture(
        vec![Candidate::new(1, &["python"])],
        vec![JobPosting::new(10, &["python"])],
    )
    .await;
    let edited = JobPosting::new(10, &["python", "go"]);

    let outcome = fx
        .engine
        .rank_posting(&MatchRequest::new(10, 0.0, 10), &edited)
        .expect("rank");
    assert!(outcome.is_empty());
    assert_eq!(outcome.empty_reason, Some(EmptyReason::NoEmbeddingForJob));
}

#[tokio::test]
async fn held_snapshots_survive_updates() {
    let fx = fixture(
        vec![Candidate::new(1, &["python"])],
        vec![JobPosting::new(10, &["python"])],
    )
    .await;

    let corpus_before = fx.corpus.snapshot().expect("corpus");
    let cache_before = fx.cache.snapshot().expect("cache");

    fx.corpus
        .rebuild(&[Candidate::new(1, &["python"]), Candidate::new(2, &["go"])]);
    fx.cache
        .put(2, EntityKind::Candidate, &normalize(&["go"]))
        .await
        .expect("put");

    assert_eq!(corpus_before.len(), 1);
    assert_eq!(corpus_before.index().len(), 1);
    assert_eq!(corpus_before.statistics().corpus_size(), 1);
    assert!(cache_before.get(2, EntityKind::Candidate).is_none());

    assert_eq!(fx.corpus.snapshot().expect("corpus").len(), 2);
    assert!(
        fx.cache
            .snapshot()
            .expect("cache")
            .get(2, EntityKind::Candidate)
            .is_some()
    );
}
