use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_postgres::PoolError;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_postgres::Error as PgError;
use tracing::{debug, instrument, warn};

use super::record::{CacheKey, EmbeddingRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("embedding store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("corrupt embedding record: {0}")]
    Corrupt(String),
}

/// Backing store for the embedding cache.
///
/// The cache reads everything once on load and writes through on every put;
/// stores never see query-time traffic.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError>;

    /// Insert or replace the record for `record.key()`.
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError>;
}

/// Process-local store, used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    records: Mutex<BTreeMap<CacheKey, EmbeddingRecord>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EmbeddingRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            records: Mutex::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Corrupt("in-memory store lock poisoned".into()))?;
        Ok(records.values().cloned().collect())
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Corrupt("in-memory store lock poisoned".into()))?;
        records.insert(record.key(), record.clone());
        Ok(())
    }
}

/// Append-only JSON-lines file. One record per line; on load the last line
/// for a key wins.
pub struct JsonlEmbeddingStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlEmbeddingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file with one line per key, dropping superseded lines.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let records = self.read_latest().await?;

        let mut buf = String::new();
        for record in records.values() {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, buf).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(records = records.len(), "compacted embedding store");
        Ok(records.len())
    }

    async fn read_latest(&self) -> Result<BTreeMap<CacheKey, EmbeddingRecord>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };

        let mut latest = BTreeMap::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EmbeddingRecord>(line) {
                Ok(record) => {
                    latest.insert(record.key(), record);
                }
                Err(err) => {
                    // A crash mid-append leaves a truncated tail; skip it.
                    warn!(line = line_no + 1, error = %err, "skipping unreadable embedding record");
                }
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl EmbeddingStore for JsonlEmbeddingStore {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        Ok(self.read_latest().await?.into_values().collect())
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        let len = file.metadata().await?.len();
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                // Terminate a truncated tail so it cannot swallow this record.
                warn!(path = %self.path.display(), "embedding store ends mid-record; starting a new line");
                line.insert(0, '\n');
            }
        }
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
