//! In-memory [`Store`] implementation for tests and embedding hosts.
//!
//! Snapshots and chunks live in maps behind one `std::sync::RwLock`, so a
//! replace (one write lock) and a scan (one read lock) can never interleave.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, ChunkVector, RecordId, RecordSnapshot};

use super::{validate_chunk_set, Store, StoreStats};

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, RecordSnapshot>,
    indexed: HashMap<RecordId, String>,
    chunks: BTreeMap<RecordId, Vec<Chunk>>,
}

/// In-memory store.
pub struct InMemoryStore {
    dims: usize,
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RetrievalError::Storage(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RetrievalError::Storage(anyhow::anyhow!("in-memory store lock poisoned")))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert_record(&self, snapshot: &RecordSnapshot) -> Result<()> {
        self.write()?
            .records
            .insert(snapshot.record_id, snapshot.clone());
        Ok(())
    }

    async fn get_record(&self, record_id: RecordId) -> Result<Option<RecordSnapshot>> {
        Ok(self.read()?.records.get(&record_id).cloned())
    }

    async fn record_ids(&self) -> Result<Vec<RecordId>> {
        Ok(self.read()?.records.keys().copied().collect())
    }

    async fn indexed_record_ids(&self) -> Result<Vec<RecordId>> {
        Ok(self
            .read()?
            .chunks
            .iter()
            .filter(|(_, chunks)| !chunks.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn indexed_hash(&self, record_id: RecordId) -> Result<Option<String>> {
        Ok(self.read()?.indexed.get(&record_id).cloned())
    }

    async fn replace_chunks_for_record(
        &self,
        record_id: RecordId,
        content_hash: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        validate_chunk_set(record_id, chunks, self.dims)?;
        let mut inner = self.write()?;
        let all_ids_free = chunks.iter().all(|c| {
            inner
                .chunks
                .iter()
                .filter(|(id, _)| **id != record_id)
                .all(|(_, existing)| existing.iter().all(|e| e.chunk_id != c.chunk_id))
        });
        if !all_ids_free {
            return Err(RetrievalError::InvalidChunk(
                "chunk id already owned by another record".to_string(),
            ));
        }
        if chunks.is_empty() {
            inner.chunks.remove(&record_id);
        } else {
            let mut ordered = chunks.to_vec();
            ordered.sort_by(|a, b| (a.source_field, a.ordinal).cmp(&(b.source_field, b.ordinal)));
            inner.chunks.insert(record_id, ordered);
        }
        inner.indexed.insert(record_id, content_hash.to_string());
        Ok(())
    }

    async fn delete_record(&self, record_id: RecordId) -> Result<u64> {
        let mut inner = self.write()?;
        inner.records.remove(&record_id);
        inner.indexed.remove(&record_id);
        Ok(inner
            .chunks
            .remove(&record_id)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    async fn all_chunks(&self) -> Result<Vec<ChunkVector>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .values()
            .flatten()
            .map(|c| ChunkVector {
                chunk_id: c.chunk_id.clone(),
                record_id: c.record_id,
                source_field: c.source_field,
                text: c.text.clone(),
                vector: c.vector.clone(),
            })
            .collect())
    }

    async fn chunks_for_record(&self, record_id: RecordId) -> Result<Vec<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .get(&record_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let stale = inner
            .records
            .values()
            .filter(|s| inner.indexed.get(&s.record_id) != Some(&s.content_hash))
            .count();
        Ok(StoreStats {
            records: inner.records.len() as i64,
            indexed_records: inner.chunks.len() as i64,
            stale_records: stale as i64,
            chunks: inner.chunks.values().map(|c| c.len() as i64).sum(),
            dims: self.dims,
        })
    }
}
