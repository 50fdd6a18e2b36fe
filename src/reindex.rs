//! `arx reindex` and `arx delete`.

use anyhow::Result;

use archive_search_core::models::{ChangeKind, RecordChange, RecordId};

use crate::archive::Archive;
use crate::config::Config;
use crate::indexer::ReindexScope;

pub async fn run_reindex_record(config: &Config, record_id: RecordId) -> Result<()> {
    let archive = Archive::open(config).await?;
    let outcome = archive.indexer.reindex(record_id).await;
    archive.store.close().await;
    let outcome = outcome?;

    println!("reindex record {}", outcome.record_id);
    println!("  state: {}", outcome.state);
    println!("  chunks: {}", outcome.chunks);
    println!("ok");
    Ok(())
}

pub async fn run_reindex_all(config: &Config, scope: ReindexScope) -> Result<()> {
    let archive = Archive::open(config).await?;
    let report = archive.indexer.reindex_all(scope).await;
    archive.store.close().await;
    let report = report?;

    let label = match scope {
        ReindexScope::All => "all",
        ReindexScope::Stale => "stale",
    };
    println!("reindex {}", label);
    println!("  indexed: {}", report.indexed);
    println!("  unchanged: {}", report.unchanged);
    println!("  orphan chunks removed: {}", report.orphans_removed);
    if report.failed > 0 {
        println!("  failed: {}", report.failed);
        anyhow::bail!("{} record(s) failed to reindex", report.failed);
    }
    println!("ok");
    Ok(())
}

pub async fn run_delete(config: &Config, record_id: RecordId) -> Result<()> {
    let archive = Archive::open_unpinned(config).await?;
    let change = RecordChange {
        record_id,
        change_kind: ChangeKind::Deleted,
        fields: Default::default(),
    };
    let outcome = archive.indexer.on_record_changed(change).await;
    archive.store.close().await;
    outcome?;

    println!("deleted record {}", record_id);
    Ok(())
}
