pub mod combiner;
pub mod corpus;
pub mod engine;
pub mod gating;
pub mod keyword_index;
pub mod ranker;
pub mod rarity;
pub mod request;
pub mod rerank;
pub mod weights;

pub use combiner::{ComponentScores, combine, exact_overlap};
pub use corpus::{CorpusEntry, CorpusHandle, CorpusSnapshot};
pub use engine::{MatchingEngine, MatchingEngineConfig};
pub use gating::{Gate, GateDiagnostics, GateRejection};
pub use keyword_index::{Bm25Params, KeywordIndex, KeywordQuery, PreparedQuery};
pub use ranker::{RankedMatch, ScoredCandidate, rank};
pub use rarity::{CorpusStatistics, RarityWeights};
pub use request::{EmptyReason, MatchOutcome, MatchRequest, MatchStrategy};
pub use rerank::RerankModel;
pub use weights::{DEFAULT_WEIGHTS, HybridWeights, SEMANTIC_ONLY_WEIGHTS};
