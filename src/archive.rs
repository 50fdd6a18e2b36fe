//! Wiring of store, embedder, indexer and query engine from a [`Config`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use archive_search_core::embedding::Embedder;
use archive_search_core::search::QueryEngine;

use crate::config::Config;
use crate::embedding::{create_embedder, index_identity};
use crate::indexer::{Indexer, IndexerOptions};
use crate::sqlite_store::SqliteStore;

/// Everything a command or the server needs, sharing one store.
pub struct Archive {
    pub store: Arc<SqliteStore>,
    pub indexer: Indexer<SqliteStore>,
    pub engine: QueryEngine<SqliteStore>,
    /// Model the query vectors come from; `None` when embedding is disabled.
    query_model: Option<String>,
}

impl Archive {
    /// Open for indexing. The configured model is pinned; a model change
    /// marks every record stale.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        // A disabled embedder writes no vectors, so it must not re-pin the
        // model the existing ones were built with.
        let store = if is_disabled(config) {
            open_store(config).await?
        } else {
            SqliteStore::open(config, embedder.model_name(), embedder.dims())
                .await
                .with_context(|| format!("Failed to open index at {}", config.db.path.display()))?
        };
        Self::assemble(config, embedder, store)
    }

    /// Open for commands that write no vectors (`search`, `delete`). The
    /// index metadata is left untouched.
    pub async fn open_unpinned(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = open_store(config).await?;
        Self::assemble(config, embedder, store)
    }

    fn assemble(config: &Config, embedder: Arc<dyn Embedder>, store: SqliteStore) -> Result<Self> {
        let store = Arc::new(store);
        let indexer = Indexer::new(
            store.clone(),
            embedder.clone(),
            IndexerOptions::from_config(config),
        )?;
        let engine = QueryEngine::new(store.clone(), embedder.clone())?;
        debug!(
            provider = %config.embedding.provider,
            model = embedder.model_name(),
            dims = embedder.dims(),
            "archive opened"
        );

        Ok(Self {
            store,
            indexer,
            engine,
            query_model: (!is_disabled(config)).then(|| embedder.model_name().to_string()),
        })
    }

    /// Fails when the stored vectors come from another model than the
    /// configured embedder. Their scores against a query vector are
    /// meaningless until the index is rebuilt.
    pub async fn ensure_query_model(&self) -> Result<()> {
        let Some(current) = &self.query_model else {
            return Ok(());
        };
        match self.store.indexed_model().await? {
            Some(indexed) if &indexed != current => bail!(
                "index was built with model {}, but the configured model is {}; \
                 run `arx reindex --stale` to rebuild it",
                indexed,
                current
            ),
            _ => Ok(()),
        }
    }
}

fn is_disabled(config: &Config) -> bool {
    config.embedding.provider == "disabled"
}

/// Open the SQLite store alone, for commands that never embed. Leaves the
/// index metadata untouched.
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    let (_, dims) = index_identity(&config.embedding);
    SqliteStore::open_unpinned(config, dims)
        .await
        .with_context(|| format!("Failed to open index at {}", config.db.path.display()))
}
