//! Keeps the chunk index in sync with record changes.
//!
//! The indexer owns the write path of a [`Store`]. For every record it
//! persists the latest narrative snapshot, chunks each field, embeds the
//! chunks in batches, and swaps the record's chunk set in one
//! [`replace_chunks_for_record`](Store::replace_chunks_for_record) call.
//!
//! # Ordering
//!
//! Work on the same record is serialized through a per-record
//! `tokio::sync::Mutex`, which grants the lock in request order. The last
//! request to acquire it determines the final chunk set; two requests are
//! never merged. Different records proceed concurrently.
//!
//! # Failure
//!
//! If embedding fails (after `indexing.max_retries` retries of
//! [`RetrievalError::EmbeddingUnavailable`]), nothing is replaced and the
//! record keeps its previous chunks. The error is returned to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use archive_search_core::chunk::{chunk_text, ChunkingConfig};
use archive_search_core::embedding::Embedder;
use archive_search_core::models::{
    hash_text, ChangeKind, Chunk, IndexState, RecordChange, RecordId, RecordSnapshot, SourceField,
};
use archive_search_core::store::Store;
use archive_search_core::{Result, RetrievalError};

use crate::config::Config;

/// Tuning knobs for the indexer.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl IndexerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking,
            batch_size: config.embedding.batch_size.max(1),
            max_retries: config.indexing.max_retries,
            backoff: Duration::from_millis(config.indexing.backoff_ms),
        }
    }
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 32,
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Which records a bulk reindex visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexScope {
    /// Every record with a stored snapshot.
    All,
    /// Only records whose chunks were derived from an older snapshot.
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Chunks removed because their record no longer has a snapshot.
    pub orphans_removed: u64,
}

/// Result of indexing (or deleting) one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub record_id: RecordId,
    pub state: IndexState,
    pub chunks: usize,
}

type RecordLock = Arc<tokio::sync::Mutex<()>>;

pub struct Indexer<S: Store + ?Sized> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    options: IndexerOptions,
    locks: Mutex<HashMap<RecordId, RecordLock>>,
    in_flight: Mutex<HashSet<RecordId>>,
}

/// Marks a record as `reindexing` while alive.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<RecordId>>,
    record_id: RecordId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.record_id);
        }
    }
}

/// A reference to one record's lock. Dropping the last reference removes
/// the table entry, also when the holding future is cancelled.
struct LockEntry<'a> {
    table: &'a Mutex<HashMap<RecordId, RecordLock>>,
    record_id: RecordId,
    lock: RecordLock,
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            // One reference in the table, one here.
            if table
                .get(&self.record_id)
                .is_some_and(|l| Arc::strong_count(l) == 2)
            {
                table.remove(&self.record_id);
            }
        }
    }
}

fn poisoned<T>(_: T) -> RetrievalError {
    RetrievalError::Storage(anyhow::anyhow!("indexer lock table poisoned"))
}

impl<S: Store + ?Sized> Indexer<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, options: IndexerOptions) -> Result<Self> {
        if embedder.dims() != store.dims() {
            return Err(RetrievalError::DimensionMismatch {
                expected: store.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self {
            store,
            embedder,
            options,
            locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply a committed change to the index.
    pub async fn on_record_changed(&self, change: RecordChange) -> Result<IndexOutcome> {
        let entry = self.record_lock(change.record_id)?;
        let _guard = entry.lock.lock().await;
        self.apply_change(change).await
    }

    /// Rebuild the chunks of one record from its stored snapshot.
    pub async fn reindex(&self, record_id: RecordId) -> Result<IndexOutcome> {
        let entry = self.record_lock(record_id)?;
        let _guard = entry.lock.lock().await;
        self.reindex_locked(record_id).await
    }

    /// Reindex every known record (or only stale ones) and sweep chunks
    /// whose record has no snapshot. A failing record is logged and
    /// counted; the run continues.
    pub async fn reindex_all(&self, scope: ReindexScope) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let record_ids = self.store.record_ids().await?;

        for &record_id in &record_ids {
            if scope == ReindexScope::Stale {
                let snapshot = match self.store.get_record(record_id).await? {
                    Some(s) => s,
                    None => continue,
                };
                let indexed = self.store.indexed_hash(record_id).await?;
                if indexed.as_deref() == Some(snapshot.content_hash.as_str()) {
                    report.unchanged += 1;
                    continue;
                }
            }

            match self.reindex(record_id).await {
                Ok(_) => report.indexed += 1,
                // Deleted since the id list was read.
                Err(RetrievalError::RecordNotFound(_)) => {}
                Err(e) => {
                    warn!(record_id, error = %e, "reindex failed");
                    report.failed += 1;
                }
            }
        }

        let known: HashSet<RecordId> = record_ids.into_iter().collect();
        for record_id in self.store.indexed_record_ids().await? {
            if known.contains(&record_id) {
                continue;
            }
            let removed = {
                let entry = self.record_lock(record_id)?;
                let _guard = entry.lock.lock().await;
                self.remove_orphan(record_id).await?
            };
            if removed > 0 {
                info!(record_id, removed, "removed orphan chunks");
            }
            report.orphans_removed += removed;
        }

        info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            failed = report.failed,
            orphans_removed = report.orphans_removed,
            "reindex finished"
        );
        Ok(report)
    }

    pub async fn state(&self, record_id: RecordId) -> Result<IndexState> {
        if self.in_flight.lock().map_err(poisoned)?.contains(&record_id) {
            return Ok(IndexState::Reindexing);
        }
        if self.store.chunks_for_record(record_id).await?.is_empty() {
            Ok(IndexState::NoChunks)
        } else {
            Ok(IndexState::Indexed)
        }
    }

    fn record_lock(&self, record_id: RecordId) -> Result<LockEntry<'_>> {
        let mut table = self.locks.lock().map_err(poisoned)?;
        let lock = Arc::clone(table.entry(record_id).or_default());
        Ok(LockEntry {
            table: &self.locks,
            record_id,
            lock,
        })
    }

    async fn apply_change(&self, change: RecordChange) -> Result<IndexOutcome> {
        let record_id = change.record_id;
        match change.change_kind {
            ChangeKind::Deleted => {
                let removed = self.store.delete_record(record_id).await?;
                info!(record_id, removed, "removed record from index");
                Ok(IndexOutcome {
                    record_id,
                    state: IndexState::NoChunks,
                    chunks: 0,
                })
            }
            ChangeKind::Created | ChangeKind::Updated => {
                let snapshot = RecordSnapshot::new(record_id, change.fields);
                self.store.upsert_record(&snapshot).await?;
                self.index_snapshot(&snapshot).await
            }
        }
    }

    async fn reindex_locked(&self, record_id: RecordId) -> Result<IndexOutcome> {
        match self.store.get_record(record_id).await? {
            Some(snapshot) => self.index_snapshot(&snapshot).await,
            None => Err(RetrievalError::RecordNotFound(record_id)),
        }
    }

    async fn remove_orphan(&self, record_id: RecordId) -> Result<u64> {
        // Re-check under the lock; a create may have raced the sweep.
        if self.store.get_record(record_id).await?.is_some() {
            return Ok(0);
        }
        self.store.delete_record(record_id).await
    }

    /// Chunk, embed and persist one snapshot. Caller holds the record lock.
    async fn index_snapshot(&self, snapshot: &RecordSnapshot) -> Result<IndexOutcome> {
        let record_id = snapshot.record_id;
        self.in_flight.lock().map_err(poisoned)?.insert(record_id);
        let _in_flight = InFlight {
            set: &self.in_flight,
            record_id,
        };

        let mut pieces: Vec<(SourceField, i64, String)> = Vec::new();
        for (field, text) in &snapshot.fields {
            for chunk in chunk_text(text, &self.options.chunking) {
                pieces.push((*field, chunk.ordinal, chunk.text));
            }
        }

        let texts: Vec<String> = pieces.iter().map(|(_, _, t)| t.clone()).collect();
        let vectors = self.embed_all(&texts).await?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|((source_field, ordinal, text), vector)| Chunk {
                chunk_id: Uuid::new_v4().to_string(),
                record_id,
                source_field,
                ordinal,
                hash: hash_text(&text),
                text,
                vector,
            })
            .collect();

        self.store
            .replace_chunks_for_record(record_id, &snapshot.content_hash, &chunks)
            .await?;

        let state = if chunks.is_empty() {
            IndexState::NoChunks
        } else {
            IndexState::Indexed
        };
        info!(record_id, chunks = chunks.len(), %state, "indexed record");
        Ok(IndexOutcome {
            record_id,
            state,
            chunks: chunks.len(),
        })
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dims = self.store.dims();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size.max(1)) {
            let embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(RetrievalError::EmbeddingUnavailable(format!(
                    "embedder returned {} vectors for {} chunks",
                    embedded.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dims) {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dims,
                    actual: bad.len(),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.embedder.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(RetrievalError::EmbeddingUnavailable(reason))
                    if attempt < self.options.max_retries =>
                {
                    let delay = self.options.backoff * 2u32.saturating_pow(attempt.min(16));
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, %reason, "embedding unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(error = %e, "embedding failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_search_core::embedding::HashEmbedder;
    use archive_search_core::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const DIMS: usize = 64;

    fn options() -> IndexerOptions {
        IndexerOptions {
            chunking: ChunkingConfig {
                max_chars: 80,
                overlap_chars: 10,
            },
            batch_size: 2,
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    /// Hash embedder that can be switched off, counting calls.
    struct Switchable {
        inner: HashEmbedder,
        down: AtomicBool,
        fail_first: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Switchable {
        fn new() -> Self {
            Self {
                inner: HashEmbedder::new(DIMS),
                down: AtomicBool::new(false),
                fail_first: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for Switchable {
        fn model_name(&self) -> &str {
            "switchable"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(RetrievalError::EmbeddingUnavailable("down".into()));
            }
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RetrievalError::EmbeddingUnavailable("transient".into()));
            }
            self.inner.embed(texts).await
        }
    }

    /// Returns vectors of the wrong length.
    struct Misconfigured;

    #[async_trait]
    impl Embedder for Misconfigured {
        fn model_name(&self) -> &str {
            "misconfigured"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; DIMS + 1]).collect())
        }
    }

    fn change(record_id: RecordId, kind: ChangeKind, fields: &[(SourceField, &str)]) -> RecordChange {
        RecordChange {
            record_id,
            change_kind: kind,
            fields: fields
                .iter()
                .map(|(f, t)| (*f, t.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<Switchable>, Indexer<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(DIMS));
        let embedder = Arc::new(Switchable::new());
        let indexer = Indexer::new(store.clone(), embedder.clone(), options()).unwrap();
        (store, embedder, indexer)
    }

    #[tokio::test]
    async fn test_created_record_is_indexed() {
        let (store, _, indexer) = setup();
        let outcome = indexer
            .on_record_changed(change(
                42,
                ChangeKind::Created,
                &[(
                    SourceField::Description,
                    "The entity behaves unpredictably near water. It emits a low hum.",
                )],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.state, IndexState::Indexed);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(indexer.state(42).await.unwrap(), IndexState::Indexed);
        let chunks = store.chunks_for_record(42).await.unwrap();
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].source_field, SourceField::Description);
    }

    #[tokio::test]
    async fn test_every_field_is_chunked_and_batched() {
        let (store, embedder, indexer) = setup();
        let long = "Containment requires a sealed chamber. ".repeat(6);
        indexer
            .on_record_changed(change(
                1,
                ChangeKind::Created,
                &[
                    (SourceField::Procedures, long.as_str()),
                    (SourceField::Description, "Short description."),
                ],
            ))
            .await
            .unwrap();

        let chunks = store.chunks_for_record(1).await.unwrap();
        assert!(chunks.len() > 2);
        assert_eq!(chunks[0].source_field, SourceField::Procedures);
        assert_eq!(chunks.last().unwrap().source_field, SourceField::Description);
        let expected_calls = chunks.len().div_ceil(2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), expected_calls);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_chunks() {
        let (store, embedder, indexer) = setup();
        indexer
            .on_record_changed(change(5, ChangeKind::Created, &[(SourceField::Notes, "first text")]))
            .await
            .unwrap();
        let before = store.chunks_for_record(5).await.unwrap();

        embedder.down.store(true, Ordering::SeqCst);
        let err = indexer
            .on_record_changed(change(5, ChangeKind::Updated, &[(SourceField::Notes, "second text")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingUnavailable(_)));
        assert!(err.is_retryable());

        assert_eq!(store.chunks_for_record(5).await.unwrap(), before);
        assert_eq!(indexer.state(5).await.unwrap(), IndexState::Indexed);
        // The snapshot moved on, so the record is now stale.
        assert_eq!(store.stats().await.unwrap().stale_records, 1);

        embedder.down.store(false, Ordering::SeqCst);
        let report = indexer.reindex_all(ReindexScope::Stale).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(store.chunks_for_record(5).await.unwrap()[0].text, "second text");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (store, embedder, indexer) = setup();
        embedder.fail_first.store(2, Ordering::SeqCst);
        indexer
            .on_record_changed(change(9, ChangeKind::Created, &[(SourceField::Summary, "incident")]))
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.chunks_for_record(9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_never_persisted() {
        let store = Arc::new(InMemoryStore::new(DIMS));
        let indexer = Indexer::new(store.clone(), Arc::new(Misconfigured), options()).unwrap();
        let err = indexer
            .on_record_changed(change(3, ChangeKind::Created, &[(SourceField::Notes, "text")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { .. }));
        assert!(store.all_chunks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_record_leaves_no_chunks() {
        let (store, _, indexer) = setup();
        indexer
            .on_record_changed(change(7, ChangeKind::Created, &[(SourceField::Notes, "agent notes")]))
            .await
            .unwrap();
        let outcome = indexer
            .on_record_changed(change(7, ChangeKind::Deleted, &[]))
            .await
            .unwrap();
        assert_eq!(outcome.state, IndexState::NoChunks);
        assert!(store.all_chunks().await.unwrap().is_empty());
        assert!(matches!(
            indexer.reindex(7).await,
            Err(RetrievalError::RecordNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_blank_text_yields_no_chunks() {
        let (store, _, indexer) = setup();
        indexer
            .on_record_changed(change(2, ChangeKind::Created, &[(SourceField::Notes, "something")]))
            .await
            .unwrap();
        let outcome = indexer
            .on_record_changed(change(2, ChangeKind::Updated, &[(SourceField::Notes, "  \n ")]))
            .await
            .unwrap();
        assert_eq!(outcome.state, IndexState::NoChunks);
        assert!(store.chunks_for_record(2).await.unwrap().is_empty());
        assert_eq!(indexer.state(2).await.unwrap(), IndexState::NoChunks);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let (store, _, indexer) = setup();
        let text = "Subject displays anomalous regenerative properties. ".repeat(4);
        indexer
            .on_record_changed(change(11, ChangeKind::Created, &[(SourceField::Description, text.as_str())]))
            .await
            .unwrap();
        let first = store.chunks_for_record(11).await.unwrap();
        indexer.reindex(11).await.unwrap();
        let second = store.chunks_for_record(11).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.ordinal, b.ordinal);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn test_stale_scope_skips_unchanged_and_sweeps_orphans() {
        let (store, embedder, indexer) = setup();
        for id in 1..=3 {
            indexer
                .on_record_changed(change(id, ChangeKind::Created, &[(SourceField::Notes, "note")]))
                .await
                .unwrap();
        }
        // Chunks without a snapshot, e.g. left behind by an older process.
        let orphan = Chunk {
            chunk_id: "orphan".into(),
            record_id: 99,
            source_field: SourceField::Notes,
            ordinal: 0,
            text: "orphan".into(),
            hash: hash_text("orphan"),
            vector: HashEmbedder::new(DIMS)
                .embed(&["orphan".to_string()])
                .await
                .unwrap()
                .remove(0),
        };
        store.replace_chunks_for_record(99, "x", &[orphan]).await.unwrap();

        let calls_before = embedder.calls.load(Ordering::SeqCst);
        let report = indexer.reindex_all(ReindexScope::Stale).await.unwrap();
        assert_eq!(
            report,
            ReindexReport {
                indexed: 0,
                unchanged: 3,
                failed: 0,
                orphans_removed: 1,
            }
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_before);
        assert!(store.chunks_for_record(99).await.unwrap().is_empty());

        let report = indexer.reindex_all(ReindexScope::All).await.unwrap();
        assert_eq!(report.indexed, 3);
        assert_eq!(report.unchanged, 0);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_stop_bulk_reindex() {
        let (_, embedder, indexer) = setup();
        indexer
            .on_record_changed(change(1, ChangeKind::Created, &[(SourceField::Notes, "one")]))
            .await
            .unwrap();
        embedder.down.store(true, Ordering::SeqCst);
        let report = indexer.reindex_all(ReindexScope::All).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.indexed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_updates_never_mix() {
        let (store, _, indexer) = setup();
        let indexer = Arc::new(indexer);
        let mut handles = Vec::new();
        for version in 0..8 {
            let indexer = indexer.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("Version {} of the containment notes. ", version).repeat(5);
                indexer
                    .on_record_changed(change(
                        20,
                        ChangeKind::Updated,
                        &[(SourceField::Procedures, text.as_str())],
                    ))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.get_record(20).await.unwrap().unwrap();
        assert_eq!(
            store.indexed_hash(20).await.unwrap(),
            Some(snapshot.content_hash.clone())
        );
        let source = &snapshot.fields[&SourceField::Procedures];
        for chunk in store.chunks_for_record(20).await.unwrap() {
            assert!(source.contains(chunk.text.trim()));
        }
        assert!(indexer.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_separator_field_does_not_block_record() {
        let (store, embedder, indexer) = setup();
        let outcome = indexer
            .on_record_changed(change(
                42,
                ChangeKind::Created,
                &[
                    (
                        SourceField::Description,
                        "The entity behaves unpredictably near water.",
                    ),
                    (SourceField::Notes, "---"),
                    (SourceField::Summary, "* * *"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.state, IndexState::Indexed);
        assert_eq!(outcome.chunks, 1);
        let chunks = store.chunks_for_record(42).await.unwrap();
        assert_eq!(chunks[0].source_field, SourceField::Description);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    /// Rejects every text as having nothing to embed.
    struct Unembeddable {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for Unembeddable {
        fn model_name(&self) -> &str {
            "unembeddable"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RetrievalError::UnembeddableText("nothing to embed".into()))
        }
    }

    #[tokio::test]
    async fn test_unembeddable_text_is_not_retried() {
        let store = Arc::new(InMemoryStore::new(DIMS));
        let embedder = Arc::new(Unembeddable {
            calls: AtomicUsize::new(0),
        });
        let indexer = Indexer::new(store, embedder.clone(), options()).unwrap();

        let err = indexer
            .on_record_changed(change(3, ChangeKind::Created, &[(SourceField::Notes, "text")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::UnembeddableText(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl Embedder for Stalled {
        fn model_name(&self) -> &str {
            "stalled"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_releases_lock() {
        let store = Arc::new(InMemoryStore::new(DIMS));
        let indexer = Indexer::new(store, Arc::new(Stalled), options()).unwrap();

        let request =
            indexer.on_record_changed(change(8, ChangeKind::Created, &[(SourceField::Notes, "text")]));
        assert!(tokio::time::timeout(Duration::from_millis(20), request)
            .await
            .is_err());

        assert!(indexer.locks.lock().unwrap().is_empty());
        assert_ne!(indexer.state(8).await.unwrap(), IndexState::Reindexing);
    }
}
