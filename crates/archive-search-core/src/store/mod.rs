//! Storage abstraction for record snapshots and chunk vectors.
//!
//! The [`Store`] trait defines every storage operation the indexer and the
//! query engine need, enabling pluggable backends (SQLite in the app crate,
//! [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` and must make
//! [`replace_chunks_for_record`](Store::replace_chunks_for_record) atomic:
//! a concurrent [`all_chunks`](Store::all_chunks) sees either the complete
//! old chunk set of a record or the complete new one.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, ChunkVector, RecordId, RecordSnapshot, SourceField};

/// Aggregate counts for `arx stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub records: i64,
    pub indexed_records: i64,
    pub stale_records: i64,
    pub chunks: i64,
    pub dims: usize,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_record`](Store::upsert_record) | Save the latest narrative snapshot |
/// | [`get_record`](Store::get_record) | Load a snapshot |
/// | [`replace_chunks_for_record`](Store::replace_chunks_for_record) | Atomically swap a record's chunk set |
/// | [`delete_record`](Store::delete_record) | Remove snapshot and chunks |
/// | [`all_chunks`](Store::all_chunks) | Full scan for ranking |
/// | [`chunks_for_record`](Store::chunks_for_record) | One record's chunks, in order |
#[async_trait]
pub trait Store: Send + Sync {
    /// Configured vector dimensionality `D`.
    fn dims(&self) -> usize;

    /// Insert or replace the narrative snapshot of a record.
    async fn upsert_record(&self, snapshot: &RecordSnapshot) -> Result<()>;

    async fn get_record(&self, record_id: RecordId) -> Result<Option<RecordSnapshot>>;

    /// All record ids with a stored snapshot, ascending.
    async fn record_ids(&self) -> Result<Vec<RecordId>>;

    /// Record ids that currently own at least one chunk, ascending.
    async fn indexed_record_ids(&self) -> Result<Vec<RecordId>>;

    /// Content hash of the snapshot the record's current chunk set was
    /// derived from, if it has been indexed.
    async fn indexed_hash(&self, record_id: RecordId) -> Result<Option<String>>;

    /// Delete every chunk of `record_id` and insert `chunks` as one atomic
    /// unit, then mark the record as indexed at `content_hash`.
    ///
    /// The whole set is validated first with [`validate_chunk_set`]; on
    /// failure nothing is written.
    async fn replace_chunks_for_record(
        &self,
        record_id: RecordId,
        content_hash: &str,
        chunks: &[Chunk],
    ) -> Result<()>;

    /// Remove the record's chunks and snapshot. Returns the number of chunks
    /// removed.
    async fn delete_record(&self, record_id: RecordId) -> Result<u64>;

    /// Snapshot of every stored chunk, taken under one read. Call again to
    /// restart the scan.
    async fn all_chunks(&self) -> Result<Vec<ChunkVector>>;

    /// Chunks of one record ordered by `(source_field, ordinal)`.
    async fn chunks_for_record(&self, record_id: RecordId) -> Result<Vec<Chunk>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Validate a complete replacement set for `record_id`.
///
/// Rejects wrong-dimension vectors, empty text, chunks owned by another
/// record, and duplicate `(source_field, ordinal)` pairs.
pub fn validate_chunk_set(record_id: RecordId, chunks: &[Chunk], dims: usize) -> Result<()> {
    let mut seen: HashSet<(SourceField, i64)> = HashSet::with_capacity(chunks.len());
    let mut ids: HashSet<&str> = HashSet::with_capacity(chunks.len());
    for chunk in chunks {
        if chunk.vector.len() != dims {
            return Err(RetrievalError::DimensionMismatch {
                expected: dims,
                actual: chunk.vector.len(),
            });
        }
        if chunk.record_id != record_id {
            return Err(RetrievalError::InvalidChunk(format!(
                "chunk {} belongs to record {}, not {}",
                chunk.chunk_id, chunk.record_id, record_id
            )));
        }
        if chunk.text.trim().is_empty() {
            return Err(RetrievalError::InvalidChunk(format!(
                "chunk {} has empty text",
                chunk.chunk_id
            )));
        }
        if chunk.ordinal < 0 {
            return Err(RetrievalError::InvalidChunk(format!(
                "chunk {} has negative ordinal {}",
                chunk.chunk_id, chunk.ordinal
            )));
        }
        if !seen.insert((chunk.source_field, chunk.ordinal)) {
            return Err(RetrievalError::InvalidChunk(format!(
                "duplicate ordinal {} for field {} of record {}",
                chunk.ordinal, chunk.source_field, record_id
            )));
        }
        if !ids.insert(chunk.chunk_id.as_str()) {
            return Err(RetrievalError::InvalidChunk(format!(
                "duplicate chunk id {}",
                chunk.chunk_id
            )));
        }
    }
    Ok(())
}
