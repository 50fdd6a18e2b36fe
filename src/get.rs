//! `arx get`: show a record's stored snapshot and its chunks.

use anyhow::Result;
use serde::Serialize;

use archive_search_core::models::{Chunk, RecordId, RecordSnapshot};
use archive_search_core::store::Store;
use archive_search_core::RetrievalError;

use crate::archive::open_store;
use crate::config::Config;

/// A record as seen by the index.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub snapshot: RecordSnapshot,
    pub indexed_hash: Option<String>,
    pub chunks: Vec<Chunk>,
}

impl RecordView {
    pub fn is_stale(&self) -> bool {
        self.indexed_hash.as_deref() != Some(self.snapshot.content_hash.as_str())
    }
}

pub async fn load_record<S: Store + ?Sized>(
    store: &S,
    record_id: RecordId,
) -> std::result::Result<RecordView, RetrievalError> {
    let snapshot = store
        .get_record(record_id)
        .await?
        .ok_or(RetrievalError::RecordNotFound(record_id))?;
    let indexed_hash = store.indexed_hash(record_id).await?;
    let chunks = store.chunks_for_record(record_id).await?;
    Ok(RecordView {
        snapshot,
        indexed_hash,
        chunks,
    })
}

pub async fn run_get(config: &Config, record_id: RecordId) -> Result<()> {
    let store = open_store(config).await?;
    let view = load_record(&store, record_id).await;
    store.close().await;
    let view = view?;

    let updated = chrono::DateTime::from_timestamp(view.snapshot.updated_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();

    println!("--- Record ---");
    println!("record_id:    {}", view.snapshot.record_id);
    println!("updated_at:   {}", updated);
    println!("content_hash: {}", view.snapshot.content_hash);
    println!(
        "index:        {}",
        if view.is_stale() { "stale" } else { "current" }
    );
    println!();

    for (field, text) in &view.snapshot.fields {
        println!("--- {} ---", field);
        println!("{}", text);
        println!();
    }

    println!("--- Chunks ({}) ---", view.chunks.len());
    for chunk in &view.chunks {
        println!("[{} #{}] {}", chunk.source_field, chunk.ordinal, chunk.chunk_id);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}
