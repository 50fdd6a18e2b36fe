//! # Archive Search
//!
//! Semantic retrieval for the anomalous-object archive. Narrative fields of
//! archive records (containment procedures, descriptions, notes, incident
//! summaries, facility purposes) are chunked, embedded, and stored as
//! vectors; free-text queries are answered with records ranked by their
//! best-matching chunk.
//!
//! ## Architecture
//!
//! ```text
//! record change ──▶ Indexer ──▶ Chunker ──▶ Embedder ──▶ Store (SQLite)
//!                                                          │
//! query ──────────▶ QueryEngine ──▶ Embedder ──▶ scan + max-pool
//! ```
//!
//! Runtime-agnostic pieces (models, chunker, embedder trait, store trait,
//! query engine) live in the `archive-search-core` crate. This crate adds
//! configuration, the SQLite store, embedding backends, the indexer, the
//! `arx` CLI, and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations and index metadata |
//! | [`sqlite_store`] | SQLite [`Store`](archive_search_core::store::Store) |
//! | [`embedding`] | Embedding backends |
//! | [`indexer`] | Record change → chunk set |
//! | [`archive`] | Wiring from a config |
//! | [`server`] | HTTP API |

pub mod archive;
pub mod config;
pub mod db;
pub mod embedding;
pub mod get;
pub mod import;
pub mod indexer;
pub mod migrate;
pub mod reindex;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
