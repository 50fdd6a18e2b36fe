//! Semantic query engine: embed, score every chunk, max-pool per record.
//!
//! The engine operates entirely through the [`Store`] and [`Embedder`]
//! traits. It never mutates the store.
//!
//! # Ranking Algorithm
//!
//! 1. Normalize the query with [`normalize_text`]; reject empty queries.
//! 2. Embed the query (unit vector of the store's dimension).
//! 3. Score every stored chunk by dot product (cosine similarity).
//! 4. Aggregate per record with MAX; the best chunk supplies the snippet
//!    from the same scan.
//! 5. Sort by score (desc), then record id (asc).
//! 6. Truncate to `top_k`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::chunk::normalize_text;
use crate::embedding::{dot, embed_one, Embedder};
use crate::error::{Result, RetrievalError};
use crate::models::{ChunkVector, RecordId, SourceField};
use crate::store::Store;

/// Maximum snippet length in characters.
pub const SNIPPET_CHARS: usize = 240;

/// One ranked record.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record_id: RecordId,
    /// Cosine similarity of the best-matching chunk, in `[-1.0, 1.0]`.
    pub score: f64,
    /// Text excerpt from the best-matching chunk.
    pub snippet: String,
    pub source_field: SourceField,
    pub chunk_id: String,
}

/// Record-level score with its best chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRecord {
    pub record_id: RecordId,
    pub score: f32,
    pub best_chunk_id: String,
    pub source_field: SourceField,
    /// First [`SNIPPET_CHARS`] characters of the best chunk.
    pub snippet: String,
}

/// Score `chunks` against `query_vec` and return the top `top_k` records.
///
/// Fails with [`RetrievalError::DimensionMismatch`] if any stored vector
/// has a different length than the query vector.
pub fn rank_records(
    query_vec: &[f32],
    chunks: &[ChunkVector],
    top_k: usize,
) -> Result<Vec<RankedRecord>> {
    let mut best: HashMap<RecordId, (f32, &ChunkVector)> = HashMap::new();

    for chunk in chunks {
        if chunk.vector.len() != query_vec.len() {
            return Err(RetrievalError::DimensionMismatch {
                expected: query_vec.len(),
                actual: chunk.vector.len(),
            });
        }
        let score = dot(query_vec, &chunk.vector).clamp(-1.0, 1.0);
        best.entry(chunk.record_id)
            .and_modify(|(s, top)| {
                if score > *s || (score == *s && chunk.chunk_id < top.chunk_id) {
                    *s = score;
                    *top = chunk;
                }
            })
            .or_insert((score, chunk));
    }

    let mut ranked: Vec<(RecordId, f32, &ChunkVector)> = best
        .into_iter()
        .map(|(record_id, (score, chunk))| (record_id, score, chunk))
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(top_k);

    Ok(ranked
        .into_iter()
        .map(|(record_id, score, chunk)| RankedRecord {
            record_id,
            score,
            best_chunk_id: chunk.chunk_id.clone(),
            source_field: chunk.source_field,
            snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
        })
        .collect())
}

/// Read-only semantic search over a [`Store`].
pub struct QueryEngine<S: Store + ?Sized> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
}

impl<S: Store + ?Sized> QueryEngine<S> {
    /// Build an engine; the embedder and store must agree on the vector
    /// dimension.
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dims() != store.dims() {
            return Err(RetrievalError::DimensionMismatch {
                expected: store.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self { store, embedder })
    }

    /// Return at most `top_k` records ranked by relevance to `query`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let normalized = normalize_text(query);
        if normalized.is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_one(self.embedder.as_ref(), &normalized).await?;
        if query_vec.len() != self.store.dims() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.store.dims(),
                actual: query_vec.len(),
            });
        }

        let chunks = self.store.all_chunks().await?;
        let ranked = rank_records(&query_vec, &chunks, top_k)?;
        debug!(
            query = %normalized,
            scanned = chunks.len(),
            returned = ranked.len(),
            "semantic search"
        );

        Ok(ranked
            .into_iter()
            .map(|r| SearchHit {
                record_id: r.record_id,
                score: r.score as f64,
                snippet: r.snippet,
                source_field: r.source_field,
                chunk_id: r.best_chunk_id,
            })
            .collect())
    }
}
