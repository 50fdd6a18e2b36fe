//! `arx search`: rank records by semantic similarity to a query.

use anyhow::Result;

use archive_search_core::search::SearchHit;

use crate::archive::Archive;
use crate::config::Config;

pub async fn search_records(config: &Config, query: &str, top_k: Option<usize>) -> Result<Vec<SearchHit>> {
    let archive = Archive::open_unpinned(config).await?;
    let hits = match archive.ensure_query_model().await {
        Ok(()) => archive
            .engine
            .search(query, config.resolve_top_k(top_k))
            .await
            .map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    archive.store.close().await;
    hits
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let hits = search_records(config, query, top_k).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] record {}", i + 1, hit.score, hit.record_id);
        println!("    field: {}", hit.source_field);
        println!("    excerpt: \"{}\"", hit.snippet.trim());
        println!("    chunk: {}", hit.chunk_id);
        println!();
    }

    Ok(())
}
