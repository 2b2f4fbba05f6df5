use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use super::combiner::{ComponentScores, exact_overlap};
use super::corpus::{CorpusEntry, CorpusHandle, CorpusSnapshot};
use super::gating::{GateDiagnostics, GateRejection, has_embedding, has_skills, meets_min_score};
use super::keyword_index::{KeywordQuery, PreparedQuery};
use super::ranker::{ScoredCandidate, rank};
use super::request::{EmptyReason, MatchOutcome, MatchRequest, MatchStrategy};
use super::rerank::{RerankModel, apply_rerank, rerank_features};
use super::weights::{DEFAULT_WEIGHTS, HybridWeights, SEMANTIC_ONLY_WEIGHTS};
use crate::embedding::{SemanticScaling, cosine_similarity};
use crate::embedding_cache::{CacheKey, CacheSnapshot, EmbeddingCache, EntityKind};
use crate::error::EngineError;
use crate::profile_source::ProfileSource;
use crate::run_id;
use crate::skill_normalizer::SkillSet;
use crate::JobPosting;

#[derive(Debug, Clone)]
pub struct MatchingEngineConfig {
    /// Used when a request carries no override
    pub weights: HybridWeights,
    pub scaling: SemanticScaling,
    /// Applied when a request carries no deadline of its own
    pub default_deadline: Option<Duration>,
}

impl Default for MatchingEngineConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS,
            scaling: SemanticScaling::default(),
            default_deadline: None,
        }
    }
}

/// Ranks the candidate corpus against one job.
///
/// The engine holds no per-request state: each call takes the current corpus
/// and cache snapshots and scores candidates in parallel against them.
pub struct MatchingEngine {
    corpus: Arc<CorpusHandle>,
    cache: Arc<EmbeddingCache>,
    reranker: Option<Arc<dyn RerankModel>>,
    config: MatchingEngineConfig,
}

/// Everything one candidate evaluation needs, shared across workers.
struct ScoringContext<'a> {
    corpus: &'a CorpusSnapshot,
    cache: &'a CacheSnapshot,
    job_skills: &'a SkillSet,
    job_vector: &'a [f32],
    query: &'a PreparedQuery,
    weights: HybridWeights,
    scaling: SemanticScaling,
    min_score: f64,
    reranker: Option<&'a dyn RerankModel>,
}

#[derive(Default)]
struct Batch {
    scored: Vec<ScoredCandidate>,
    diagnostics: GateDiagnostics,
}

impl Batch {
    fn merge(mut self, other: Batch) -> Batch {
        self.scored.extend(other.scored);
        self.diagnostics = self.diagnostics.merge(other.diagnostics);
        self
    }
}

impl MatchingEngine {
    pub fn new(
        corpus: Arc<CorpusHandle>,
        cache: Arc<EmbeddingCache>,
        config: MatchingEngineConfig,
    ) -> Result<Self, EngineError> {
        config.weights.validate()?;
        Ok(Self {
            corpus,
            cache,
            reranker: None,
            config,
        })
    }

    pub fn with_reranker(mut self, model: Arc<dyn RerankModel>) -> Self {
        self.reranker = Some(model);
        self
    }

    pub fn config(&self) -> &MatchingEngineConfig {
        &self.config
    }

    /// Looks the job up in `source` and ranks candidates for it.
    pub fn rank_for_job(
        &self,
        request: &MatchRequest,
        source: &dyn ProfileSource,
    ) -> Result<MatchOutcome, EngineError> {
        let started = Instant::now();
        request.validate()?;

        match source.job(request.job_id)? {
            Some(job) => self.rank_job(request, &job, started),
            None => {
                let outcome = MatchOutcome::empty(
                    run_id::generate(),
                    request,
                    EmptyReason::JobNotFound,
                    GateDiagnostics::default(),
                    started.elapsed(),
                );
                record_metrics(&outcome);
                Ok(outcome)
            }
        }
    }

    /// Ranks candidates for an already-loaded job record.
    pub fn rank_posting(
        &self,
        request: &MatchRequest,
        job: &JobPosting,
    ) -> Result<MatchOutcome, EngineError> {
        let started = Instant::now();
        request.validate()?;
        self.rank_job(request, job, started)
    }

    #[instrument(skip_all, fields(job_id = request.job_id, strategy = %request.strategy))]
    fn rank_job(
        &self,
        request: &MatchRequest,
        job: &JobPosting,
        started: Instant,
    ) -> Result<MatchOutcome, EngineError> {
        let corpus = self.corpus.snapshot().ok_or(EngineError::CorpusUnavailable)?;
        let cache = self
            .cache
            .snapshot()
            .map_err(|_| EngineError::CacheUnavailable)?;
        let run_id = run_id::generate();

        let empty = |reason: EmptyReason, diagnostics: GateDiagnostics| {
            let outcome =
                MatchOutcome::empty(run_id.clone(), request, reason, diagnostics, started.elapsed());
            record_metrics(&outcome);
            debug!(reason = reason.as_str(), "no matches");
            Ok(outcome)
        };

        let job_skills = job.skill_set();
        let job_lookup = cache.lookup_fresh(job.id, EntityKind::Job, &job_skills);
        let Some(job_record) = job_lookup.fresh() else {
            return empty(EmptyReason::NoEmbeddingForJob, GateDiagnostics::default());
        };

        if corpus.is_empty() {
            return empty(EmptyReason::CorpusEmpty, GateDiagnostics::default());
        }

        let weights = match request.strategy {
            MatchStrategy::SemanticOnly => SEMANTIC_ONLY_WEIGHTS,
            MatchStrategy::Hybrid | MatchStrategy::HybridReranked => {
                request.weights.unwrap_or(self.config.weights)
            }
        };
        let reranker = match request.strategy {
            MatchStrategy::HybridReranked => self.reranker.as_deref(),
            _ => None,
        };

        let query = corpus.index().prepare(&KeywordQuery::from_skills(&job_skills));
        let ctx = ScoringContext {
            corpus: &corpus,
            cache: &cache,
            job_skills: &job_skills,
            job_vector: &job_record.vector,
            query: &query,
            weights,
            scaling: self.config.scaling,
            min_score: request.min_score,
            reranker,
        };

        let deadline = request
            .deadline
            .or(self.config.default_deadline)
            .map(|budget| started + budget);

        let batch = corpus
            .entries()
            .par_iter()
            .enumerate()
            .fold(Batch::default, |mut batch, (doc_index, entry)| {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    batch.diagnostics.skipped_by_deadline += 1;
                    return batch;
                }
                batch.diagnostics.evaluated += 1;
                match score_candidate(&ctx, doc_index, entry) {
                    Ok(scored) => batch.scored.push(scored),
                    Err(rejection) => batch.diagnostics.record(rejection),
                }
                batch
            })
            .reduce(Batch::default, Batch::merge);

        let Batch {
            scored,
            diagnostics,
        } = batch;
        let partial = diagnostics.skipped_by_deadline > 0;

        if scored.is_empty() {
            let mut outcome = MatchOutcome::empty(
                run_id.clone(),
                request,
                EmptyReason::NoCandidatesPassedGating,
                diagnostics,
                started.elapsed(),
            );
            outcome.partial = partial;
            record_metrics(&outcome);
            return Ok(outcome);
        }

        let total_matches = scored.len();
        let matches = rank(scored, job.id, request.top_k, corpus.rarity());

        let outcome = MatchOutcome {
            run_id,
            job_id: job.id,
            strategy: request.strategy,
            matches,
            total_matches,
            processing_time: started.elapsed(),
            partial,
            diagnostics,
            empty_reason: None,
        };
        record_metrics(&outcome);

        info!(
            run_id = %outcome.run_id,
            corpus_version = corpus.version(),
            evaluated = diagnostics.evaluated,
            passed = total_matches,
            returned = outcome.matches.len(),
            partial,
            elapsed_ms = outcome.processing_time.as_millis() as u64,
            "ranked candidates"
        );
        Ok(outcome)
    }
}

/// Runs one candidate through the gates and the scorer.
fn score_candidate(
    ctx: &ScoringContext<'_>,
    doc_index: usize,
    entry: &CorpusEntry,
) -> Result<ScoredCandidate, GateRejection> {
    let key = CacheKey::new(entry.candidate_id, EntityKind::Candidate);
    let record = has_embedding(ctx.cache.lookup_fingerprint(key, &entry.fingerprint))?;
    has_skills(&entry.skills)?;

    let components = ComponentScores {
        semantic: ctx
            .scaling
            .normalize_score(cosine_similarity(ctx.job_vector, &record.vector)),
        keyword: ctx.corpus.index().normalized_prepared(ctx.query, doc_index),
        exact_overlap: exact_overlap(ctx.job_skills, &entry.skills),
        rarity_weighted_overlap: ctx
            .corpus
            .rarity()
            .weighted_overlap(ctx.job_skills, &entry.skills),
    };
    let hybrid_score = components.combine(&ctx.weights);
    let matched_skills = ctx.job_skills.intersection(&entry.skills);

    let final_score = match ctx.reranker {
        Some(model) => {
            let features = rerank_features(
                hybrid_score,
                ctx.job_skills.len(),
                entry.skills.len(),
                matched_skills.len(),
            );
            apply_rerank(model, &components, &features, hybrid_score)
        }
        None => hybrid_score,
    };

    meets_min_score(final_score, ctx.min_score)?;

    Ok(ScoredCandidate {
        candidate_id: entry.candidate_id,
        final_score,
        components,
        missing_skills: ctx.job_skills.difference(&entry.skills),
        matched_skills,
    })
}

fn record_metrics(outcome: &MatchOutcome) {
    metrics::counter!("tm_match_requests_total", "strategy" => outcome.strategy.as_str())
        .increment(1);
    metrics::histogram!("tm_match_duration_seconds").record(outcome.processing_time.as_secs_f64());
    for (rejection, count) in outcome.diagnostics.exclusions() {
        metrics::counter!(
            "tm_gate_excluded_total",
            "gate" => rejection.gate().as_str(),
            "reason" => rejection.as_str()
        )
        .increment(count as u64);
    }
}
