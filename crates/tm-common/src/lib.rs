pub mod config;
pub mod db;
pub mod embedding;
pub mod embedding_cache;
pub mod error;
pub mod logging;
pub mod matching;
pub mod profile_source;
pub mod run_id;
pub mod skill_normalizer;
pub mod snapshot;

use serde::{Deserialize, Serialize};

use skill_normalizer::{SkillSet, normalize};

pub use error::{ConfigError, EngineError};

// Read-only profile snapshots supplied by the persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl Candidate {
    pub fn new<S: AsRef<str>>(id: i64, skills: &[S]) -> Self {
        Self {
            id,
            skills: skills.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn skill_set(&self) -> SkillSet {
        normalize(&self.skills)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl JobPosting {
    pub fn new<S: AsRef<str>>(id: i64, skills: &[S]) -> Self {
        Self {
            id,
            title: None,
            skills: skills.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn skill_set(&self) -> SkillSet {
        normalize(&self.skills)
    }
}
