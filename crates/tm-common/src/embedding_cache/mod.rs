//! Persisted embedding cache keyed by (entity id, entity kind).
//!
//! Query time only ever reads the in-memory snapshot. Vectors are computed by
//! the out-of-band population job (`population`), which writes through to the
//! backing store and then publishes a new snapshot.

pub mod population;
pub mod record;
pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::{EmbeddingProvider, ProviderError};
use crate::skill_normalizer::SkillSet;
use crate::snapshot::SnapshotCell;
pub use record::{CacheKey, EmbeddingRecord, EntityKind};
pub use store::{EmbeddingStore, InMemoryEmbeddingStore, JsonlEmbeddingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding cache has not been loaded")]
    NotLoaded,
}

impl CacheError {
    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Provider(err) if err.is_retryable())
    }
}

/// Result of a fingerprint-checked read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<R> {
    Fresh(R),
    /// A record exists but was computed from different skills
    Stale(R),
    Missing,
}

impl<R> CacheLookup<R> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }

    pub fn fresh(self) -> Option<R> {
        match self {
            CacheLookup::Fresh(record) => Some(record),
            _ => None,
        }
    }
}

impl CacheLookup<&EmbeddingRecord> {
    pub fn cloned(self) -> CacheLookup<EmbeddingRecord> {
        match self {
            CacheLookup::Fresh(r) => CacheLookup::Fresh(r.clone()),
            CacheLookup::Stale(r) => CacheLookup::Stale(r.clone()),
            CacheLookup::Missing => CacheLookup::Missing,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

/// Lookup counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.stale
    }

    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

/// Immutable view of the cache at one point in time.
#[derive(Debug)]
pub struct CacheSnapshot {
    records: HashMap<CacheKey, EmbeddingRecord>,
    dimension: usize,
    counters: Arc<Counters>,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn get(&self, entity_id: i64, kind: EntityKind) -> Option<&EmbeddingRecord> {
        self.records.get(&CacheKey::new(entity_id, kind))
    }

    /// Fingerprint-checked read with a precomputed fingerprint.
    pub fn lookup_fingerprint(&self, key: CacheKey, fingerprint: &str) -> CacheLookup<&EmbeddingRecord> {
        let lookup = match self.records.get(&key) {
            Some(record) if record.is_fresh_for(fingerprint) => CacheLookup::Fresh(record),
            Some(record) => CacheLookup::Stale(record),
            None => CacheLookup::Missing,
        };
        let counter = match lookup {
            CacheLookup::Fresh(_) => &self.counters.hits,
            CacheLookup::Stale(_) => &self.counters.stale,
            CacheLookup::Missing => &self.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        lookup
    }

    pub fn lookup_fresh(
        &self,
        entity_id: i64,
        kind: EntityKind,
        skills: &SkillSet,
    ) -> CacheLookup<&EmbeddingRecord> {
        self.lookup_fingerprint(CacheKey::new(entity_id, kind), &skills.fingerprint())
    }
}

/// True when `record` was computed from a different skill set.
pub fn is_stale(record: &EmbeddingRecord, current_skills: &SkillSet) -> bool {
    !record.is_fresh_for(&current_skills.fingerprint())
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn EmbeddingStore>,
    cell: SnapshotCell<CacheSnapshot>,
    /// Written through to the store but not yet visible to readers
    staged: Mutex<Vec<EmbeddingRecord>>,
    counters: Arc<Counters>,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            provider,
            store,
            cell: SnapshotCell::empty(),
            staged: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.is_loaded()
    }

    pub fn snapshot(&self) -> Result<Arc<CacheSnapshot>, CacheError> {
        self.cell.load().ok_or(CacheError::NotLoaded)
    }

    /// Replaces the snapshot with the store's contents.
    ///
    /// Records whose length differs from the provider's dimension were made by
    /// a different model; they are dropped and will show up as missing.
    pub async fn load_from_store(&self) -> Result<usize, CacheError> {
        let records = self.store.load_all().await?;
        let dimension = self.dimension();

        let mut map = HashMap::with_capacity(records.len());
        let mut dropped = 0usize;
        for record in records {
            if record.dimension() != dimension {
                dropped += 1;
                continue;
            }
            map.insert(record.key(), record);
        }
        if dropped > 0 {
            warn!(dropped, expected = dimension, "dropped cached embeddings with foreign dimension");
        }

        let loaded = map.len();
        self.cell.publish(CacheSnapshot {
            records: map,
            dimension,
            counters: Arc::clone(&self.counters),
        });
        info!(store = self.store.name(), records = loaded, dimension, "embedding cache loaded");
        Ok(loaded)
    }

    /// Snapshot read; never triggers computation.
    pub fn get(&self, entity_id: i64, kind: EntityKind) -> Option<EmbeddingRecord> {
        let snapshot = self.cell.load()?;
        let record = snapshot.get(entity_id, kind).cloned();
        let counter = if record.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        record
    }

    pub fn lookup_fresh(
        &self,
        entity_id: i64,
        kind: EntityKind,
        skills: &SkillSet,
    ) -> Result<CacheLookup<EmbeddingRecord>, CacheError> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.lookup_fresh(entity_id, kind, skills).cloned())
    }

    pub fn is_stale(&self, record: &EmbeddingRecord, current_skills: &SkillSet) -> bool {
        is_stale(record, current_skills)
    }

    /// Computes, persists and publishes the embedding for one entity.
    pub async fn put(
        &self,
        entity_id: i64,
        kind: EntityKind,
        skills: &SkillSet,
    ) -> Result<EmbeddingRecord, CacheError> {
        let record = self.put_deferred(entity_id, kind, skills).await?;
        self.publish()?;
        Ok(record)
    }

    /// Like `put`, but the record only becomes visible to readers at the next
    /// `publish`. Batch population uses this to publish in chunks.
    ///
    /// Fails with `NotLoaded` before `load_from_store`, so a snapshot built
    /// from staged records can never hide the store's contents.
    pub async fn put_deferred(
        &self,
        entity_id: i64,
        kind: EntityKind,
        skills: &SkillSet,
    ) -> Result<EmbeddingRecord, CacheError> {
        if !self.is_loaded() {
            return Err(CacheError::NotLoaded);
        }
        let vector = self.provider.embed(skills).await?;
        let expected = self.dimension();
        if vector.len() != expected {
            return Err(CacheError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let record = EmbeddingRecord {
            entity_id,
            entity_kind: kind,
            vector,
            content_fingerprint: skills.fingerprint(),
            provider: self.provider.name().to_string(),
            provider_version: self.provider.version().to_string(),
            computed_at: Utc::now(),
        };

        self.store.upsert(&record).await?;
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());

        debug!(key = %record.key(), "embedding stored");
        Ok(record)
    }

    /// Merges staged records into a new snapshot. Returns how many were merged.
    ///
    /// Staged records are drained under the snapshot writer lock, so
    /// concurrent publishers apply them in staging order.
    pub fn publish(&self) -> Result<usize, CacheError> {
        if !self.is_loaded() {
            return Err(CacheError::NotLoaded);
        }
        let dimension = self.dimension();
        let counters = Arc::clone(&self.counters);
        let mut merged = 0usize;

        self.cell.try_update(|current| {
            let current = current?;
            let staged = std::mem::take(&mut *self.staged.lock().unwrap_or_else(PoisonError::into_inner));
            if staged.is_empty() {
                return None;
            }
            merged = staged.len();
            let mut records = current.records.clone();
            for record in staged {
                records.insert(record.key(), record);
            }
            Some(CacheSnapshot {
                records,
                dimension,
                counters,
            })
        });
        Ok(merged)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            entries: self.cell.load().map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Keys among `entities` whose record is missing or stale.
    pub fn stale_entities<'a, I>(&self, entities: I) -> Result<Vec<CacheKey>, CacheError>
    where
        I: IntoIterator<Item = (CacheKey, &'a SkillSet)>,
    {
        let snapshot = self.snapshot()?;
        Ok(entities
            .into_iter()
            .filter(|(key, skills)| match snapshot.records.get(key) {
                Some(record) => is_stale(record, skills),
                None => true,
            })
            .map(|(key, _)| key)
            .collect())
    }
}
