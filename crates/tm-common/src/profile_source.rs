use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use crate::{Candidate, JobPosting};

#[derive(Debug, thiserror::Error)]
pub enum ProfileSourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only access to candidate and job records.
///
/// Implementations hold their records in memory; lookups never block.
pub trait ProfileSource: Send + Sync {
    fn job(&self, job_id: i64) -> Result<Option<JobPosting>, ProfileSourceError>;

    fn candidates(&self) -> Result<Vec<Candidate>, ProfileSourceError>;

    fn jobs(&self) -> Result<Vec<JobPosting>, ProfileSourceError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileSource {
    candidates: BTreeMap<i64, Candidate>,
    jobs: BTreeMap<i64, JobPosting>,
}

impl InMemoryProfileSource {
    pub fn new(
        candidates: impl IntoIterator<Item = Candidate>,
        jobs: impl IntoIterator<Item = JobPosting>,
    ) -> Self {
        Self {
            candidates: candidates.into_iter().map(|c| (c.id, c)).collect(),
            jobs: jobs.into_iter().map(|j| (j.id, j)).collect(),
        }
    }

    pub fn insert_candidate(&mut self, candidate: Candidate) {
        self.candidates.insert(candidate.id, candidate);
    }

    pub fn insert_job(&mut self, job: JobPosting) {
        self.jobs.insert(job.id, job);
    }
}

impl ProfileSource for InMemoryProfileSource {
    fn job(&self, job_id: i64) -> Result<Option<JobPosting>, ProfileSourceError> {
        Ok(self.jobs.get(&job_id).cloned())
    }

    fn candidates(&self) -> Result<Vec<Candidate>, ProfileSourceError> {
        Ok(self.candidates.values().cloned().collect())
    }

    fn jobs(&self) -> Result<Vec<JobPosting>, ProfileSourceError> {
        Ok(self.jobs.values().cloned().collect())
    }
}

/// Profiles exported as JSON lines (`{"id": 1, "skills": ["rust"]}` per line).
///
/// Files are read once at `open`; later record ids replace earlier ones.
#[derive(Debug, Clone)]
pub struct JsonlProfileSource {
    inner: InMemoryProfileSource,
}

impl JsonlProfileSource {
    pub fn open(candidates_path: &Path, jobs_path: Option<&Path>) -> Result<Self, ProfileSourceError> {
        let candidates: Vec<Candidate> = read_jsonl(candidates_path)?;
        let jobs: Vec<JobPosting> = match jobs_path {
            Some(path) => read_jsonl(path)?,
            None => Vec::new(),
        };
        info!(
            candidates = candidates.len(),
            jobs = jobs.len(),
            path = %candidates_path.display(),
            "loaded profiles"
        );
        Ok(Self {
            inner: InMemoryProfileSource::new(candidates, jobs),
        })
    }
}

impl ProfileSource for JsonlProfileSource {
    fn job(&self, job_id: i64) -> Result<Option<JobPosting>, ProfileSourceError> {
        self.inner.job(job_id)
    }

    fn candidates(&self) -> Result<Vec<Candidate>, ProfileSourceError> {
        self.inner.candidates()
    }

    fn jobs(&self) -> Result<Vec<JobPosting>, ProfileSourceError> {
        self.inner.jobs()
    }
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ProfileSourceError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ProfileSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| ProfileSourceError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}
