//! `arx stats`: index size and freshness at a glance.

use anyhow::Result;

use archive_search_core::store::Store;

use crate::archive::open_store;
use crate::config::Config;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await;
    let model = store.indexed_model().await;
    store.close().await;
    let stats = stats?;
    let model = model?.unwrap_or_else(|| "unknown".to_string());

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Archive Search Index Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Provider:    {}", config.embedding.provider);
    println!("  Model:       {}", model);
    println!("  Dimensions:  {}", stats.dims);
    println!();
    println!("  Records:     {}", stats.records);
    println!("  Indexed:     {}", stats.indexed_records);
    println!("  Stale:       {}", stats.stale_records);
    println!("  Chunks:      {}", stats.chunks);
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
