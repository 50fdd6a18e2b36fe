//! `arx import`: apply a JSONL file of record change notifications.
//!
//! Each non-blank line is one change, e.g.
//!
//! ```json
//! {"record_id": 42, "change_kind": "created", "fields": {"description": "It hums."}}
//! ```
//!
//! Lines are applied in order. A malformed line or a failed record is
//! reported and skipped; the command fails at the end if any line failed.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::warn;

use archive_search_core::models::{ChangeKind, IndexState, RecordChange};

use crate::archive::Archive;
use crate::config::Config;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub indexed: usize,
    pub empty: usize,
    pub deleted: usize,
    pub chunks: usize,
    pub failed: usize,
}

pub async fn import_changes(archive: &Archive, content: &str) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let change = match RecordChange::from_json(line) {
            Ok(change) => change,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping invalid change");
                eprintln!("line {}: {}", line_no + 1, e);
                summary.failed += 1;
                continue;
            }
        };

        let kind = change.change_kind;
        let record_id = change.record_id;
        match archive.indexer.on_record_changed(change).await {
            Ok(_) if kind == ChangeKind::Deleted => summary.deleted += 1,
            Ok(outcome) if outcome.state == IndexState::NoChunks => summary.empty += 1,
            Ok(outcome) => {
                summary.indexed += 1;
                summary.chunks += outcome.chunks;
            }
            Err(e) => {
                eprintln!("line {} (record {}): {}", line_no + 1, record_id, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let archive = Archive::open(config).await?;
    let summary = import_changes(&archive, &content).await;
    archive.store.close().await;

    println!("import {}", path.display());
    println!("  records indexed: {}", summary.indexed);
    println!("  records without text: {}", summary.empty);
    println!("  records deleted: {}", summary.deleted);
    println!("  chunks written: {}", summary.chunks);
    if summary.failed > 0 {
        println!("  failed: {}", summary.failed);
        bail!("{} change(s) could not be applied", summary.failed);
    }
    println!("ok");
    Ok(())
}
