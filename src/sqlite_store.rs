//! SQLite-backed [`Store`].
//!
//! Record snapshots live in `records`, chunk vectors in `chunks` (vector
//! as a little-endian f32 BLOB). A chunk-set replacement is one
//! transaction, and a full scan is one `SELECT`, so under WAL a reader sees
//! a record's chunks either entirely before or entirely after a replace.
//!
//! Writes from one store are serialized on `writes`, and every write
//! transaction starts with a write statement. A transaction that read
//! first would have to upgrade its snapshot to a write lock, which SQLite
//! refuses with `SQLITE_BUSY` without consulting the busy timeout.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use archive_search_core::embedding::{blob_to_vec, vec_to_blob};
use archive_search_core::models::{Chunk, ChunkVector, RecordId, RecordSnapshot, SourceField};
use archive_search_core::store::{validate_chunk_set, Store, StoreStats};
use archive_search_core::{Result, RetrievalError};

use crate::config::Config;
use crate::{db, migrate};

fn storage(e: sqlx::Error) -> RetrievalError {
    RetrievalError::Storage(e.into())
}

pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
    writes: Mutex<()>,
}

impl SqliteStore {
    /// Open the configured database for indexing: create the schema if
    /// needed and pin (or verify) the embedding model and dimension.
    pub async fn open(config: &Config, model: &str, dims: usize) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        migrate::pin_index_meta(&pool, model, dims).await?;
        Ok(Self::from_pool(pool, dims))
    }

    /// Open without writing the index metadata, for callers that never
    /// embed. The dimension is still verified.
    pub async fn open_unpinned(config: &Config, dims: usize) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        migrate::verify_index_meta(&pool, dims).await?;
        Ok(Self::from_pool(pool, dims))
    }

    fn from_pool(pool: SqlitePool, dims: usize) -> Self {
        Self {
            pool,
            dims,
            writes: Mutex::new(()),
        }
    }

    /// Embedding model the stored vectors were produced with.
    pub async fn indexed_model(&self) -> Result<Option<String>> {
        migrate::get_meta(&self.pool, "model").await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn encode_fields(fields: &BTreeMap<SourceField, String>) -> Result<String> {
    let plain: BTreeMap<&str, &str> = fields
        .iter()
        .map(|(field, text)| (field.as_str(), text.as_str()))
        .collect();
    serde_json::to_string(&plain).map_err(|e| RetrievalError::Storage(e.into()))
}

fn decode_fields(json: &str) -> Result<BTreeMap<SourceField, String>> {
    let plain: BTreeMap<String, String> =
        serde_json::from_str(json).map_err(|e| RetrievalError::Storage(e.into()))?;
    plain
        .into_iter()
        .map(|(name, text)| Ok((SourceField::from_str(&name)?, text)))
        .collect()
}

fn parse_field(name: &str) -> Result<SourceField> {
    SourceField::from_str(name).map_err(|_| {
        RetrievalError::Storage(anyhow::anyhow!("unknown source_field '{}' in chunks table", name))
    })
}

#[async_trait]
impl Store for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert_record(&self, snapshot: &RecordSnapshot) -> Result<()> {
        let fields_json = encode_fields(&snapshot.fields)?;
        let _writing = self.writes.lock().await;
        sqlx::query(
            r#"
            INSERT INTO records (record_id, fields_json, content_hash, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(record_id) DO UPDATE SET
                fields_json = excluded.fields_json,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.record_id)
        .bind(&fields_json)
        .bind(&snapshot.content_hash)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_record(&self, record_id: RecordId) -> Result<Option<RecordSnapshot>> {
        let row = sqlx::query(
            "SELECT record_id, fields_json, content_hash, updated_at FROM records WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => {
                let fields_json: String = row.get("fields_json");
                Ok(Some(RecordSnapshot {
                    record_id: row.get("record_id"),
                    fields: decode_fields(&fields_json)?,
                    content_hash: row.get("content_hash"),
                    updated_at: row.get("updated_at"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn record_ids(&self) -> Result<Vec<RecordId>> {
        sqlx::query_scalar("SELECT record_id FROM records ORDER BY record_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn indexed_record_ids(&self) -> Result<Vec<RecordId>> {
        sqlx::query_scalar("SELECT DISTINCT record_id FROM chunks ORDER BY record_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn indexed_hash(&self, record_id: RecordId) -> Result<Option<String>> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT indexed_hash FROM records WHERE record_id = ?")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(hash.flatten())
    }

    async fn replace_chunks_for_record(
        &self,
        record_id: RecordId,
        content_hash: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        validate_chunk_set(record_id, chunks, self.dims)?;

        let _writing = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("DELETE FROM chunks WHERE record_id = ?")
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        // Any id still present after the delete belongs to another record.
        for chunk in chunks {
            let owner: Option<i64> =
                sqlx::query_scalar("SELECT record_id FROM chunks WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage)?;
            if owner.is_some() {
                return Err(RetrievalError::InvalidChunk(format!(
                    "chunk id {} already owned by another record",
                    chunk.chunk_id
                )));
            }
        }

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (chunk_id, record_id, source_field, ordinal, text, hash, vector)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(record_id)
            .bind(chunk.source_field.as_str())
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&chunk.vector))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        sqlx::query("UPDATE records SET indexed_hash = ? WHERE record_id = ?")
            .bind(content_hash)
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn delete_record(&self, record_id: RecordId) -> Result<u64> {
        let _writing = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let removed = sqlx::query("DELETE FROM chunks WHERE record_id = ?")
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();
        sqlx::query("DELETE FROM records WHERE record_id = ?")
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(removed)
    }

    async fn all_chunks(&self) -> Result<Vec<ChunkVector>> {
        let rows = sqlx::query(
            "SELECT chunk_id, record_id, source_field, text, vector FROM chunks ORDER BY record_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let field: String = row.get("source_field");
                let blob: Vec<u8> = row.get("vector");
                Ok(ChunkVector {
                    chunk_id: row.get("chunk_id"),
                    record_id: row.get("record_id"),
                    source_field: parse_field(&field)?,
                    text: row.get("text"),
                    vector: blob_to_vec(&blob)?,
                })
            })
            .collect()
    }

    async fn chunks_for_record(&self, record_id: RecordId) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, record_id, source_field, ordinal, text, hash, vector
             FROM chunks WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut chunks = rows
            .iter()
            .map(|row| {
                let field: String = row.get("source_field");
                let blob: Vec<u8> = row.get("vector");
                Ok(Chunk {
                    chunk_id: row.get("chunk_id"),
                    record_id: row.get("record_id"),
                    source_field: parse_field(&field)?,
                    ordinal: row.get("ordinal"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                    vector: blob_to_vec(&blob)?,
                })
            })
            .collect::<Result<Vec<Chunk>>>()?;
        // Field order is the enum order, not the alphabetical column order.
        chunks.sort_by(|a, b| (a.source_field, a.ordinal).cmp(&(b.source_field, b.ordinal)));
        Ok(chunks)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let indexed_records: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT record_id) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let stale_records: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM records WHERE indexed_hash IS NULL OR indexed_hash != content_hash",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        Ok(StoreStats {
            records,
            indexed_records,
            stale_records,
            chunks,
            dims: self.dims,
        })
    }
}
