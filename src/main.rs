//! # Archive Search CLI (`arx`)
//!
//! ```bash
//! arx --config ./config/arx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arx init` | Create the SQLite index and run schema migrations |
//! | `arx import <file.jsonl>` | Apply record change notifications |
//! | `arx search "<query>"` | Rank records by semantic similarity |
//! | `arx get <id>` | Show a record's snapshot and chunks |
//! | `arx reindex <id>` | Rebuild one record's chunks |
//! | `arx reindex --stale` | Rebuild records whose text changed since indexing |
//! | `arx delete <id>` | Remove a record from the index |
//! | `arx stats` | Index size and freshness |
//! | `arx serve` | Start the HTTP API |
//!
//! Logging goes to stderr; set `RUST_LOG` (default `archive_search=info`).

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use archive_search::indexer::ReindexScope;
use archive_search::{config, get, import, migrate, reindex, search, server, stats};

/// Semantic retrieval over the anomalous-object archive.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/arx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "arx",
    about = "Semantic search over archive records: chunk, embed, index, rank",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Apply a JSONL file of record changes (one JSON object per line).
    Import {
        /// Path to the `.jsonl` file.
        file: PathBuf,
    },

    /// Search records by meaning.
    Search {
        /// The search query string.
        query: String,
        /// Maximum number of records to return (capped by `retrieval.max_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print a record's stored narrative fields and chunks.
    Get {
        /// Record id.
        id: i64,
    },

    /// Rebuild chunks and embeddings.
    #[command(group(ArgGroup::new("target").required(true).args(["id", "all", "stale"])))]
    Reindex {
        /// Reindex a single record.
        id: Option<i64>,
        /// Reindex every record and remove orphan chunks.
        #[arg(long)]
        all: bool,
        /// Reindex only records whose text changed since they were indexed.
        #[arg(long)]
        stale: bool,
    },

    /// Remove a record and all of its chunks from the index.
    Delete {
        /// Record id.
        id: i64,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archive_search=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::Reindex { id, all, stale } => match (id, all, stale) {
            (Some(id), _, _) => reindex::run_reindex_record(&cfg, id).await?,
            (None, true, _) => reindex::run_reindex_all(&cfg, ReindexScope::All).await?,
            (None, false, _) => reindex::run_reindex_all(&cfg, ReindexScope::Stale).await?,
        },
        Commands::Delete { id } => {
            reindex::run_delete(&cfg, id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
