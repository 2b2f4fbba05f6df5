use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tm_common::config::EngineConfig;
use tm_common::db::{PgEmbeddingStore, create_pool_from_url, run_migrations};
use tm_common::embedding::{EmbeddingProvider, create_provider};
use tm_common::embedding_cache::population::{PopulationConfig, run_population};
use tm_common::embedding_cache::{
    CacheKey, EmbeddingCache, EmbeddingStore, EntityKind, JsonlEmbeddingStore,
};
use tm_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use tm_common::matching::{CorpusHandle, MatchingEngine};
use tm_common::profile_source::{JsonlProfileSource, ProfileSource};
use tm_common::skill_normalizer::SkillSet;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "tm-embed-worker",
    about = "Populate the embedding cache for candidates and jobs"
)]
struct Cli {
    /// Candidate profiles as JSON lines
    #[arg(long, env = "TM_CANDIDATES_PATH")]
    candidates: PathBuf,

    /// Job postings as JSON lines
    #[arg(long, env = "TM_JOBS_PATH")]
    jobs: Option<PathBuf>,

    /// Embedding store: a JSON-lines file path or a postgres:// url
    #[arg(long, env = "TM_EMBEDDING_STORE", default_value = "embeddings.jsonl")]
    store: String,

    /// Prometheus exporter port
    #[arg(long, env = "TM_METRICS_PORT", default_value_t = 9464)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Embed every entity whose cached vector is missing or stale (default)
    Populate {
        /// Resume file; entities recorded as completed are skipped
        #[arg(long, env = "TM_CHECKPOINT_PATH")]
        checkpoint: Option<PathBuf>,

        #[arg(long, env = "TM_POPULATION_MAX_ATTEMPTS", default_value_t = 3)]
        max_attempts: u32,

        #[arg(long, env = "TM_POPULATION_PUBLISH_EVERY", default_value_t = 64)]
        publish_every: usize,

        /// Rewrite a JSON-lines store with one line per entity afterwards
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
    /// Rank candidates for one job and print the outcome as JSON
    Rank {
        #[arg(long)]
        job_id: i64,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        min_score: Option<f64>,
    },
}

enum StoreBackend {
    Jsonl(Arc<JsonlEmbeddingStore>),
    Postgres(Arc<PgEmbeddingStore>),
}

impl StoreBackend {
    async fn open(location: &str) -> anyhow::Result<Self> {
        if location.starts_with("postgres://") || location.starts_with("postgresql://") {
            let pool = create_pool_from_url(location)?;
            run_migrations(&pool)
                .await
                .context("failed to run embedding store migrations")?;
            Ok(Self::Postgres(Arc::new(PgEmbeddingStore::new(pool))))
        } else {
            Ok(Self::Jsonl(Arc::new(JsonlEmbeddingStore::new(location))))
        }
    }

    fn as_store(&self) -> Arc<dyn EmbeddingStore> {
        match self {
            Self::Jsonl(store) => Arc::clone(store) as Arc<dyn EmbeddingStore>,
            Self::Postgres(store) => Arc::clone(store) as Arc<dyn EmbeddingStore>,
        }
    }
}

fn population_entities(source: &dyn ProfileSource) -> anyhow::Result<Vec<(CacheKey, SkillSet)>> {
    let candidates = source.candidates()?;
    let jobs = source.jobs()?;

    let mut entities = Vec::with_capacity(candidates.len() + jobs.len());
    entities.extend(
        candidates
            .iter()
            .map(|c| (CacheKey::new(c.id, EntityKind::Candidate), c.skill_set())),
    );
    entities.extend(
        jobs.iter()
            .map(|j| (CacheKey::new(j.id, EntityKind::Job), j.skill_set())),
    );
    Ok(entities)
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = ?err, "tm-embed-worker failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing_subscriber("tm-embed-worker");
    install_tracing_panic_hook("tm-embed-worker");

    let cli = Cli::parse();
    let engine_config = EngineConfig::from_env()?;
    tm_metrics::init_metrics("TM_METRICS_PORT", cli.metrics_port);

    let source = JsonlProfileSource::open(&cli.candidates, cli.jobs.as_deref())?;
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&engine_config.embedding)?);
    let backend = StoreBackend::open(&cli.store).await?;
    let cache = Arc::new(EmbeddingCache::new(provider, backend.as_store()));
    cache.load_from_store().await?;

    info!(
        provider = %engine_config.embedding.provider,
        dimension = engine_config.embedding.dimension,
        store = %cli.store,
        "tm-embed-worker starting"
    );

    match cli.command.unwrap_or(Command::Populate {
        checkpoint: None,
        max_attempts: 3,
        publish_every: 64,
        compact: false,
    }) {
        Command::Populate {
            checkpoint,
            max_attempts,
            publish_every,
            compact,
        } => {
            let config = PopulationConfig {
                max_attempts,
                publish_every,
                checkpoint_path: checkpoint,
                ..PopulationConfig::default()
            };
            let entities = population_entities(&source)?;
            let report = run_population(&cache, entities, &config).await?;

            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "some entities could not be embedded");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);

            if compact {
                match &backend {
                    StoreBackend::Jsonl(store) => {
                        let kept = store.compact().await?;
                        info!(records = kept, "compacted embedding store");
                    }
                    StoreBackend::Postgres(_) => {
                        warn!("--compact only applies to JSON-lines stores");
                    }
                }
            }
        }
        Command::Rank {
            job_id,
            top_k,
            min_score,
        } => {
            let corpus = Arc::new(CorpusHandle::new(engine_config.bm25));
            corpus.rebuild_from_source(&source)?;
            let engine = MatchingEngine::new(corpus, cache, engine_config.engine_config())?;

            let mut request = engine_config.request(job_id);
            if let Some(top_k) = top_k {
                request.top_k = top_k;
            }
            if let Some(min_score) = min_score {
                request.min_score = min_score;
            }

            let outcome = engine.rank_for_job(&request, &source)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
