//! # Archive Search Core
//!
//! Runtime-agnostic retrieval logic for the archive catalog: record change
//! models, narrative chunking, the embedder trait, the vector store trait,
//! and the max-pooled similarity ranking.
//!
//! This crate contains no tokio, sqlx, or network dependencies. The
//! `archive-search` application crate supplies the SQLite store, the
//! remote embedding adapters, and the indexing orchestration.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Result, RetrievalError};
