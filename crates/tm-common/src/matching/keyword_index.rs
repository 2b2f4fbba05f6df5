//! BM25 keyword index over candidate skill documents.
//!
//! Each candidate's canonical skill set becomes one document whose terms are
//! the word tokens of its skills (`"machine learning"` → `machine`,
//! `learning`). Scoring runs on the `bm25` crate's embedder and scorer with a
//! tokenizer that emits those terms. The index is immutable once built; a
//! corpus change means a full rebuild and a new corpus snapshot.

use std::fmt;

use bm25::{Embedder, EmbedderBuilder, Embedding, Scorer, Tokenizer};
use serde::{Deserialize, Serialize};

use crate::embedding::tokenizer::skill_terms;
use crate::error::EngineError;
use crate::skill_normalizer::SkillSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length normalization strength, 0.0..=1.0
    pub b: f64,
    /// Raw scores are divided by `query_terms * normalization` before clamping
    pub normalization: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            normalization: 5.0,
        }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "bm25 k1 must be >= 0, got {}",
                self.k1
            )));
        }
        if !self.b.is_finite() || !(0.0..=1.0).contains(&self.b) {
            return Err(EngineError::InvalidRequest(format!(
                "bm25 b must be within 0..=1, got {}",
                self.b
            )));
        }
        if !self.normalization.is_finite() || self.normalization <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "bm25 normalization must be > 0, got {}",
                self.normalization
            )));
        }
        Ok(())
    }
}

/// Splits a newline-joined skill document into the same word terms the
/// embedding tokenizer emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillTermTokenizer;

impl Tokenizer for SkillTermTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        input_text
            .split('\n')
            .flat_map(skill_terms)
            .map(str::to_string)
            .collect()
    }
}

fn skill_document(skills: &SkillSet) -> String {
    skills.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

/// Query terms prepared once per request.
#[derive(Debug, Clone, Default)]
pub struct KeywordQuery {
    text: String,
    term_count: usize,
}

impl KeywordQuery {
    pub fn from_skills(skills: &SkillSet) -> Self {
        let text = skill_document(skills);
        let term_count = SkillTermTokenizer.tokenize(&text).len();
        Self { text, term_count }
    }

    pub fn len(&self) -> usize {
        self.term_count
    }

    pub fn is_empty(&self) -> bool {
        self.term_count == 0
    }
}

/// Query embedding against one index; build once per ranking pass.
pub struct PreparedQuery {
    embedding: Embedding<u32>,
    term_count: usize,
}

pub struct KeywordIndex {
    params: Bm25Params,
    embedder: Embedder<u32, SkillTermTokenizer>,
    scorer: Scorer<usize, u32>,
    len: usize,
    avg_doc_len: f32,
}

impl fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordIndex")
            .field("params", &self.params)
            .field("len", &self.len)
            .field("avg_doc_len", &self.avg_doc_len)
            .finish_non_exhaustive()
    }
}

impl KeywordIndex {
    /// Builds the index; document `i` corresponds to `corpus[i]`.
    pub fn build(corpus: &[SkillSet], params: Bm25Params) -> Self {
        let documents: Vec<String> = corpus.iter().map(skill_document).collect();
        let total_terms: usize = documents
            .iter()
            .map(|doc| SkillTermTokenizer.tokenize(doc).len())
            .sum();
        let avg_doc_len = if documents.is_empty() || total_terms == 0 {
            1.0
        } else {
            total_terms as f32 / documents.len() as f32
        };

        let embedder = EmbedderBuilder::<u32, SkillTermTokenizer>::with_avgdl(avg_doc_len)
            .k1(params.k1 as f32)
            .b(params.b as f32)
            .build();

        let mut scorer = Scorer::<usize, u32>::new();
        for (doc_index, doc) in documents.iter().enumerate() {
            scorer.upsert(&doc_index, embedder.embed(doc));
        }

        Self {
            params,
            embedder,
            scorer,
            len: documents.len(),
            avg_doc_len,
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    pub fn prepare(&self, query: &KeywordQuery) -> PreparedQuery {
        PreparedQuery {
            embedding: self.embedder.embed(&query.text),
            term_count: query.term_count,
        }
    }

    /// Raw BM25 score of `doc_index`. Unknown documents score 0.0.
    pub fn score_prepared(&self, query: &PreparedQuery, doc_index: usize) -> f64 {
        if query.term_count == 0 {
            return 0.0;
        }
        self.scorer
            .score(&doc_index, &query.embedding)
            .map(f64::from)
            .filter(|score| score.is_finite())
            .unwrap_or(0.0)
    }

    pub fn score(&self, query: &KeywordQuery, doc_index: usize) -> f64 {
        self.score_prepared(&self.prepare(query), doc_index)
    }

    /// Raw score divided by `query_terms * normalization`, clamped to
    /// 0.0..=1.0; an empty query scores 0.0.
    pub fn normalized_prepared(&self, query: &PreparedQuery, doc_index: usize) -> f64 {
        if query.term_count == 0 {
            return 0.0;
        }
        let raw = self.score_prepared(query, doc_index);
        (raw / (query.term_count as f64 * self.params.normalization)).clamp(0.0, 1.0)
    }

    pub fn normalized_score(&self, query: &KeywordQuery, doc_index: usize) -> f64 {
        self.normalized_prepared(&self.prepare(query), doc_index)
    }
}
