//! Schema creation and index metadata checks.
//!
//! Migrations are idempotent (`CREATE ... IF NOT EXISTS`). The
//! `index_meta` table pins the embedding model and dimension the stored
//! vectors were produced with. Opening an index with a different dimension
//! is refused until it is rebuilt; a different model marks every record
//! stale.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use archive_search_core::RetrievalError;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            record_id INTEGER PRIMARY KEY,
            fields_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_hash TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No foreign key to records: a chunk set may be written before its
    // snapshot, and orphans are swept by a full reindex.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            record_id INTEGER NOT NULL,
            source_field TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL,
            UNIQUE(record_id, source_field, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_record_id ON chunks(record_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Verify the configured dimension against the one the index was built
/// with, without writing anything.
///
/// Returns the model name the stored vectors were produced with, if the
/// index has been pinned.
pub async fn verify_index_meta(
    pool: &SqlitePool,
    dims: usize,
) -> std::result::Result<Option<String>, RetrievalError> {
    if let Some(value) = get_meta(pool, "dims").await? {
        let existing: usize = value.parse().map_err(|_| {
            RetrievalError::Storage(anyhow::anyhow!("corrupt index_meta dims value '{}'", value))
        })?;
        if existing != dims {
            return Err(RetrievalError::DimensionMismatch {
                expected: existing,
                actual: dims,
            });
        }
    }
    get_meta(pool, "model").await
}

/// Record the embedding model and dimension on first use, or verify them
/// against what the index was built with.
///
/// A different dimension fails with [`RetrievalError::DimensionMismatch`].
/// A different model name with the same dimension is accepted, but every
/// record is marked stale in the same transaction so that
/// `arx reindex --stale` rebuilds its vectors with the new model.
pub async fn pin_index_meta(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
) -> std::result::Result<(), RetrievalError> {
    let existing_model = verify_index_meta(pool, dims).await?;
    if existing_model.as_deref() == Some(model) {
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(storage)?;
    let marked = match &existing_model {
        Some(previous) => {
            let marked = sqlx::query("UPDATE records SET indexed_hash = NULL")
                .execute(&mut *tx)
                .await
                .map_err(storage)?
                .rows_affected();
            warn!(
                previous = previous.as_str(),
                current = model,
                marked,
                "embedding model changed; all records marked stale, run `arx reindex --stale`"
            );
            marked
        }
        None => 0,
    };
    set_meta(&mut *tx, "model", model).await?;
    set_meta(&mut *tx, "dims", &dims.to_string()).await?;
    tx.commit().await.map_err(storage)?;
    if existing_model.is_none() {
        info!(model, dims, marked, "initialized index metadata");
    }
    Ok(())
}

fn storage(e: sqlx::Error) -> RetrievalError {
    RetrievalError::Storage(e.into())
}

pub async fn get_meta(
    pool: &SqlitePool,
    key: &str,
) -> std::result::Result<Option<String>, RetrievalError> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(storage)?;
    Ok(value)
}

async fn set_meta(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
) -> std::result::Result<(), RetrievalError> {
    sqlx::query(
        "INSERT INTO index_meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await
    .map_err(storage)?;
    Ok(())
}
