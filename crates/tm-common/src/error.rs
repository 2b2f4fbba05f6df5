use thiserror::Error;

use crate::profile_source::ProfileSourceError;

/// Hard failures of a ranking request.
///
/// Everything else (missing embeddings, empty skill sets, unknown jobs) yields
/// a well-formed, possibly empty `MatchOutcome` with an `empty_reason`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("candidate corpus has not been loaded")]
    CorpusUnavailable,

    #[error("embedding cache has not been loaded")]
    CacheUnavailable,

    #[error("invalid match request: {0}")]
    InvalidRequest(String),

    #[error("invalid hybrid weights: {0}")]
    InvalidWeights(String),

    #[error(transparent)]
    ProfileSource(#[from] ProfileSourceError),
}

/// Invalid `TM_*` configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}
