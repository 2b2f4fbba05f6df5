use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::gating::GateDiagnostics;
use super::ranker::RankedMatch;
use super::weights::HybridWeights;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Final score is the semantic signal alone
    SemanticOnly,
    /// Four-signal fusion
    #[default]
    Hybrid,
    /// Hybrid, then the re-rank model when one is configured
    HybridReranked,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::SemanticOnly => "semantic_only",
            MatchStrategy::Hybrid => "hybrid",
            MatchStrategy::HybridReranked => "hybrid_reranked",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "semantic_only" | "semantic" => Ok(MatchStrategy::SemanticOnly),
            "hybrid" => Ok(MatchStrategy::Hybrid),
            "hybrid_reranked" | "reranked" => Ok(MatchStrategy::HybridReranked),
            other => Err(format!("unknown match strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub job_id: i64,
    pub min_score: f64,
    pub top_k: usize,
    /// Overrides the engine's configured weights
    #[serde(default)]
    pub weights: Option<HybridWeights>,
    #[serde(default)]
    pub strategy: MatchStrategy,
    /// Overall time budget; on expiry the best-effort result is returned
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl MatchRequest {
    pub fn new(job_id: i64, min_score: f64, top_k: usize) -> Self {
        Self {
            job_id,
            min_score,
            top_k,
            weights: None,
            strategy: MatchStrategy::default(),
            deadline: None,
        }
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.min_score.is_finite() || !(0.0..=1.0).contains(&self.min_score) {
            return Err(EngineError::InvalidRequest(format!(
                "min_score must be within 0..=1, got {}",
                self.min_score
            )));
        }
        if self.top_k == 0 {
            return Err(EngineError::InvalidRequest("top_k must be > 0".into()));
        }
        if let Some(weights) = &self.weights {
            weights.validate()?;
        }
        Ok(())
    }
}

/// Why a well-formed outcome carries no matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    JobNotFound,
    NoEmbeddingForJob,
    CorpusEmpty,
    NoCandidatesPassedGating,
}

impl EmptyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmptyReason::JobNotFound => "job not found",
            EmptyReason::NoEmbeddingForJob => "no embedding for job",
            EmptyReason::CorpusEmpty => "corpus empty",
            EmptyReason::NoCandidatesPassedGating => "no candidates passed gating",
        }
    }
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub run_id: String,
    pub job_id: i64,
    pub strategy: MatchStrategy,
    pub matches: Vec<RankedMatch>,
    /// Candidates that passed every gate, before `top_k` truncation
    pub total_matches: usize,
    pub processing_time: Duration,
    /// Deadline hit; `matches` covers only the candidates scored in time
    pub partial: bool,
    pub diagnostics: GateDiagnostics,
    pub empty_reason: Option<EmptyReason>,
}

impl MatchOutcome {
    pub(crate) fn empty(
        run_id: String,
        request: &MatchRequest,
        reason: EmptyReason,
        diagnostics: GateDiagnostics,
        processing_time: Duration,
    ) -> Self {
        Self {
            run_id,
            job_id: request.job_id,
            strategy: request.strategy,
            matches: Vec::new(),
            total_matches: 0,
            processing_time,
            partial: false,
            diagnostics,
            empty_reason: Some(reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::weights::DEFAULT_WEIGHTS;

    #[test]
    fn validates_min_score_and_top_k() {
        assert!(MatchRequest::new(1, 0.5, 10).validate().is_ok());
        assert!(MatchRequest::new(1, 1.5, 10).validate().is_err());
        assert!(MatchRequest::new(1, -0.1, 10).validate().is_err());
        assert!(MatchRequest::new(1, f64::NAN, 10).validate().is_err());
        assert!(MatchRequest::new(1, 0.5, 0).validate().is_err());
    }

    #[test]
    fn validates_weight_overrides() {
        let bad = HybridWeights {
            keyword: 0.9,
            ..DEFAULT_WEIGHTS
        };
        let err = MatchRequest::new(1, 0.0, 5)
            .with_weights(bad)
            .validate()
            .expect_err("invalid weights");
        assert!(matches!(err, EngineError::InvalidWeights(_)));
    }

    #[test]
    fn strategy_parses_and_serializes() {
        assert_eq!("semantic-only".parse::<MatchStrategy>(), Ok(MatchStrategy::SemanticOnly));
        assert_eq!("HYBRID".parse::<MatchStrategy>(), Ok(MatchStrategy::Hybrid));
        assert!("magic".parse::<MatchStrategy>().is_err());

        let json = serde_json::to_string(&MatchStrategy::HybridReranked).expect("serialize");
        assert_eq!(json, r#"{"type":"hybrid_reranked"}"#);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: MatchRequest =
            serde_json::from_str(r#"{"job_id": 4, "min_score": 0.2, "top_k": 3}"#).expect("parse");
        assert_eq!(request.strategy, MatchStrategy::Hybrid);
        assert!(request.weights.is_none());
        assert!(request.deadline.is_none());
    }

    #[test]
    fn empty_reasons_read_naturally() {
        assert_eq!(EmptyReason::JobNotFound.to_string(), "job not found");
        assert_eq!(
            EmptyReason::NoCandidatesPassedGating.to_string(),
            "no candidates passed gating"
        );
    }
}
