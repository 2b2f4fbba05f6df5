//! Out-of-band embedding population.
//!
//! Entities go through a small in-memory work queue
//! (pending → processing → completed | failed). Provider hiccups are retried
//! with exponential backoff; one bad entity never stops the batch. Every
//! committed entity is recorded in a JSON checkpoint so a restarted run
//! resumes the same run id and reports what it already covered.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CacheError, CacheKey, EmbeddingCache, EntityKind};
use crate::embedding::ProviderError;
use crate::run_id;
use crate::skill_normalizer::SkillSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PopulationTask {
    pub key: CacheKey,
    pub skills: SkillSet,
    pub status: TaskStatus,
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PopulationTask {
    pub fn new(key: CacheKey, skills: SkillSet) -> Self {
        Self {
            key,
            skills,
            status: TaskStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Work queue with O(1) dedupe. Ready tasks are served in enqueue order;
/// tasks waiting out a backoff sit in a min-heap keyed by retry time.
pub struct PopulationQueue {
    tasks: Vec<PopulationTask>,
    keys: HashSet<CacheKey>,
    ready: VecDeque<usize>,
    delayed: BinaryHeap<Reverse<(DateTime<Utc>, usize)>>,
    /// Tasks that are pending or processing
    unfinished: usize,
    max_attempts: u32,
    base_backoff: Duration,
}

impl PopulationQueue {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            keys: HashSet::new(),
            ready: VecDeque::new(),
            delayed: BinaryHeap::new(),
            unfinished: 0,
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Adds a task unless one for the same key is already queued.
    pub fn enqueue(&mut self, key: CacheKey, skills: SkillSet) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.ready.push_back(self.tasks.len());
        self.tasks.push(PopulationTask::new(key, skills));
        self.unfinished += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, idx: usize) -> Option<&PopulationTask> {
        self.tasks.get(idx)
    }

    /// Oldest pending task whose retry time has passed. The task stays
    /// queued until `start` takes it.
    pub fn poll_next(&mut self, now: DateTime<Utc>) -> Option<usize> {
        while let Some(&Reverse((ready_at, idx))) = self.delayed.peek() {
            if ready_at > now {
                break;
            }
            self.delayed.pop();
            self.ready.push_back(idx);
        }
        while let Some(&idx) = self.ready.front() {
            if self.status(idx) == Some(TaskStatus::Pending) {
                return Some(idx);
            }
            self.ready.pop_front();
        }
        None
    }

    /// Earliest retry time among tasks waiting out a backoff.
    pub fn next_ready_at(&self) -> Option<DateTime<Utc>> {
        self.delayed.peek().map(|Reverse((ready_at, _))| *ready_at)
    }

    /// Moves a pending task to processing. `None` for an unknown index or a
    /// task that is not pending.
    pub fn start(&mut self, idx: usize) -> Option<&PopulationTask> {
        if self.status(idx) != Some(TaskStatus::Pending) {
            return None;
        }
        if self.ready.front() == Some(&idx) {
            self.ready.pop_front();
        } else if let Some(pos) = self.ready.iter().position(|&queued| queued == idx) {
            self.ready.remove(pos);
        }

        let task = self.tasks.get_mut(idx)?;
        task.status = TaskStatus::Processing;
        task.attempts += 1;
        Some(task)
    }

    /// Marks a processing task completed; false if `idx` is not processing.
    pub fn complete(&mut self, idx: usize) -> bool {
        let Some(task) = self
            .tasks
            .get_mut(idx)
            .filter(|task| task.status == TaskStatus::Processing)
        else {
            return false;
        };
        task.status = TaskStatus::Completed;
        task.next_retry_at = None;
        task.last_error = None;
        self.unfinished -= 1;
        true
    }

    /// Records a failure. Retryable errors go back to pending with backoff
    /// until `max_attempts` is reached; everything else fails the task.
    /// `None` if `idx` is not processing.
    pub fn fail(
        &mut self,
        idx: usize,
        error: &CacheError,
        now: DateTime<Utc>,
    ) -> Option<TaskStatus> {
        let attempts = self
            .tasks
            .get(idx)
            .filter(|task| task.status == TaskStatus::Processing)?
            .attempts;
        let max_attempts = self.max_attempts;
        let backoff = self.backoff_for(attempts, error);

        let task = self.tasks.get_mut(idx)?;
        task.last_error = Some(error.to_string());

        if error.is_retryable() && task.attempts < max_attempts {
            let ready_at = now + backoff;
            task.status = TaskStatus::Pending;
            task.next_retry_at = Some(ready_at);
            self.delayed.push(Reverse((ready_at, idx)));
        } else {
            task.status = TaskStatus::Failed;
            task.next_retry_at = None;
            self.unfinished -= 1;
        }
        Some(task.status)
    }

    fn status(&self, idx: usize) -> Option<TaskStatus> {
        self.tasks.get(idx).map(|task| task.status)
    }

    fn backoff_for(&self, attempts: u32, error: &CacheError) -> Duration {
        let exponent = attempts.saturating_sub(1).min(10);
        let backoff = self.base_backoff * (1i32 << exponent);

        let retry_after = match error {
            CacheError::Provider(ProviderError::Retryable {
                retry_after: Some(after),
                ..
            }) => Duration::from_std(*after).ok(),
            _ => None,
        };
        retry_after.map_or(backoff, |after| after.max(backoff))
    }

    pub fn is_drained(&self) -> bool {
        self.unfinished == 0
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint at {path} is not valid json: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk progress of a population run, keyed by `CacheKey` display form.
///
/// Stamped with the provider that produced the entries; a checkpoint from
/// another provider, version or dimension is discarded on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationCheckpoint {
    pub run_id: String,
    pub provider: String,
    pub provider_version: String,
    pub dimension: usize,
    /// key → fingerprint the committed vector was computed from
    pub completed: BTreeMap<String, String>,
    /// key → last error
    pub failed: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PopulationCheckpoint {
    pub fn new(run_id: impl Into<String>, cache: &EmbeddingCache) -> Self {
        Self {
            run_id: run_id.into(),
            provider: cache.provider().name().to_string(),
            provider_version: cache.provider().version().to_string(),
            dimension: cache.dimension(),
            ..Self::default()
        }
    }

    /// True when the entries were embedded by the cache's current provider.
    pub fn matches_cache(&self, cache: &EmbeddingCache) -> bool {
        let provider = cache.provider();
        self.provider == provider.name()
            && self.provider_version == provider.version()
            && self.dimension == cache.dimension()
    }

    pub async fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| CheckpointError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes to a sibling temp file and renames it into place.
    pub async fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.updated_at = Some(Utc::now());
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };

        let body = serde_json::to_vec_pretty(self).map_err(|source| CheckpointError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    /// Deletes the checkpoint file; a missing file is not an error.
    pub async fn remove(path: &Path) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn is_completed(&self, key: &CacheKey, fingerprint: &str) -> bool {
        self.completed
            .get(&key.to_string())
            .is_some_and(|fp| fp == fingerprint)
    }

    fn mark_completed(&mut self, key: &CacheKey, fingerprint: String) {
        let key = key.to_string();
        self.failed.remove(&key);
        self.completed.insert(key, fingerprint);
    }

    fn mark_failed(&mut self, key: &CacheKey, error: String) {
        let key = key.to_string();
        self.completed.remove(&key);
        self.failed.insert(key, error);
    }
}

#[derive(Debug, Clone)]
pub struct PopulationConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Staged records are published to readers every this many commits
    pub publish_every: usize,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::milliseconds(500),
            publish_every: 64,
            checkpoint_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationReport {
    pub run_id: String,
    pub submitted: usize,
    pub completed: usize,
    pub skipped_fresh: usize,
    pub skipped_checkpointed: usize,
    pub skipped_empty: usize,
    pub retried: usize,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum PopulationError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Embeds every entity whose cached vector is missing or stale.
///
/// The checkpoint never overrides the cache: an entity is skipped only when
/// the loaded snapshot holds a fresh record for it. Candidates without skills
/// are skipped since ranking excludes them anyway; jobs are embedded even when
/// empty so they can still be ranked. A run that drains without failures
/// deletes its checkpoint.
///
/// Entity failures are reported, not returned: only an unloaded cache or an
/// unwritable checkpoint aborts the run.
pub async fn run_population(
    cache: &EmbeddingCache,
    entities: Vec<(CacheKey, SkillSet)>,
    config: &PopulationConfig,
) -> Result<PopulationReport, PopulationError> {
    let snapshot = cache.snapshot()?;

    let mut checkpoint = match &config.checkpoint_path {
        Some(path) => match PopulationCheckpoint::load(path).await? {
            Some(existing) if existing.matches_cache(cache) => {
                info!(
                    run_id = %existing.run_id,
                    completed = existing.completed.len(),
                    failed = existing.failed.len(),
                    "resuming population from checkpoint"
                );
                existing
            }
            Some(foreign) => {
                warn!(
                    run_id = %foreign.run_id,
                    provider = %foreign.provider,
                    provider_version = %foreign.provider_version,
                    dimension = foreign.dimension,
                    "checkpoint was written by another provider; starting over"
                );
                PopulationCheckpoint::new(run_id::get(), cache)
            }
            None => PopulationCheckpoint::new(run_id::get(), cache),
        },
        None => PopulationCheckpoint::new(run_id::get(), cache),
    };

    let mut report = PopulationReport {
        run_id: checkpoint.run_id.clone(),
        submitted: entities.len(),
        ..PopulationReport::default()
    };

    let mut queue = PopulationQueue::new(config.max_attempts, config.base_backoff);
    for (key, skills) in entities {
        if skills.is_empty() && key.kind == EntityKind::Candidate {
            report.skipped_empty += 1;
            continue;
        }
        let fingerprint = skills.fingerprint();
        if snapshot.lookup_fingerprint(key, &fingerprint).is_fresh() {
            if checkpoint.is_completed(&key, &fingerprint) {
                report.skipped_checkpointed += 1;
            } else {
                report.skipped_fresh += 1;
            }
            continue;
        }
        queue.enqueue(key, skills);
    }
    drop(snapshot);

    info!(
        run_id = %report.run_id,
        queued = queue.len(),
        skipped_fresh = report.skipped_fresh,
        skipped_checkpointed = report.skipped_checkpointed,
        "embedding population started"
    );

    let publish_every = config.publish_every.max(1);
    let mut unpublished = 0usize;

    while !queue.is_drained() {
        let now = Utc::now();
        let Some(idx) = queue.poll_next(now) else {
            if let Some(ready_at) = queue.next_ready_at() {
                let wait = (ready_at - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
            }
            continue;
        };

        let Some((key, skills)) = queue.start(idx).map(|task| (task.key, task.skills.clone()))
        else {
            continue;
        };

        match cache.put_deferred(key.entity_id, key.kind, &skills).await {
            Ok(record) => {
                queue.complete(idx);
                checkpoint.mark_completed(&key, record.content_fingerprint);
                report.completed += 1;
                unpublished += 1;
                metrics::counter!("tm_embedding_population_total", "outcome" => "completed")
                    .increment(1);
                debug!(%key, "embedding committed");

                if unpublished >= publish_every {
                    cache.publish()?;
                    unpublished = 0;
                }
                save_checkpoint(&mut checkpoint, config).await?;
            }
            Err(err) => match queue.fail(idx, &err, Utc::now()) {
                Some(TaskStatus::Pending) => {
                    report.retried += 1;
                    metrics::counter!("tm_embedding_population_total", "outcome" => "retried")
                        .increment(1);
                    warn!(%key, error = %err, "embedding failed; will retry");
                }
                _ => {
                    let message = err.to_string();
                    checkpoint.mark_failed(&key, message.clone());
                    report.failed.push((key.to_string(), message));
                    metrics::counter!("tm_embedding_population_total", "outcome" => "failed")
                        .increment(1);
                    warn!(%key, error = %err, "embedding failed permanently");
                    save_checkpoint(&mut checkpoint, config).await?;
                }
            },
        }
    }

    cache.publish()?;
    match &config.checkpoint_path {
        Some(path) if report.failed.is_empty() => {
            PopulationCheckpoint::remove(path).await?;
            debug!(path = %path.display(), "population drained cleanly; checkpoint removed");
        }
        _ => save_checkpoint(&mut checkpoint, config).await?,
    }

    info!(
        run_id = %report.run_id,
        completed = report.completed,
        failed = report.failed.len(),
        retried = report.retried,
        "embedding population finished"
    );
    Ok(report)
}

async fn save_checkpoint(
    checkpoint: &mut PopulationCheckpoint,
    config: &PopulationConfig,
) -> Result<(), CheckpointError> {
    match &config.checkpoint_path {
        Some(path) => checkpoint.save(path).await,
        None => Ok(()),
    }
}
