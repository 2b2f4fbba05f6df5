use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::instrument;

use crate::db::PgPool;
use crate::embedding_cache::record::{EmbeddingRecord, EntityKind};
use crate::embedding_cache::store::{EmbeddingStore, StoreError};

/// `tm.embedding_cache`, keyed by (entity_id, entity_kind).
pub struct PgEmbeddingStore {
    pool: PgPool,
}

impl PgEmbeddingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &Row) -> Result<EmbeddingRecord, StoreError> {
    let kind: String = row.try_get("entity_kind")?;
    let entity_kind = kind.parse::<EntityKind>().map_err(StoreError::Corrupt)?;
    let computed_at: DateTime<Utc> = row.try_get("computed_at")?;

    Ok(EmbeddingRecord {
        entity_id: row.try_get("entity_id")?,
        entity_kind,
        vector: row.try_get("vector")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        provider: row.try_get("provider")?,
        provider_version: row.try_get("provider_version")?,
        computed_at,
    })
}

#[async_trait]
impl EmbeddingStore for PgEmbeddingStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT entity_id, entity_kind, vector, content_fingerprint,
                        provider, provider_version, computed_at
                 FROM tm.embedding_cache
                 ORDER BY entity_kind, entity_id",
                &[],
            )
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self, record), fields(key = %record.key()))]
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare(
                "INSERT INTO tm.embedding_cache (
                    entity_id,
                    entity_kind,
                    vector,
                    content_fingerprint,
                    provider,
                    provider_version,
                    computed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (entity_id, entity_kind) DO UPDATE SET
                    vector = EXCLUDED.vector,
                    content_fingerprint = EXCLUDED.content_fingerprint,
                    provider = EXCLUDED.provider,
                    provider_version = EXCLUDED.provider_version,
                    computed_at = EXCLUDED.computed_at",
            )
            .await?;

        client
            .execute(
                &stmt,
                &[
                    &record.entity_id,
                    &record.entity_kind.as_str(),
                    &record.vector,
                    &record.content_fingerprint,
                    &record.provider,
                    &record.provider_version,
                    &record.computed_at,
                ],
            )
            .await?;
        Ok(())
    }
}
