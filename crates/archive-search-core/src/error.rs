//! Error taxonomy for indexing and retrieval.
//!
//! Every failure is scoped to a single record or a single query. Callers
//! decide whether to retry using [`RetrievalError::is_retryable`].

use thiserror::Error;

use crate::models::RecordId;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedding backend is unreachable, timed out, or could not embed
    /// the given text.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A vector's length disagrees with the configured dimension. Requires
    /// a full reindex after a configuration change.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("query must not be empty")]
    EmptyQuery,

    /// The text has nothing an embedder can represent (no letters or
    /// digits). Repeating the call cannot succeed.
    #[error("text has no embeddable content: {0}")]
    UnembeddableText(String),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// A record change payload failed boundary validation.
    #[error("invalid record change: {0}")]
    InvalidChange(String),

    /// A chunk set failed validation before persistence.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Whether the same request may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetrievalError::EmbeddingUnavailable(_) | RetrievalError::Storage(_)
        )
    }

    /// Stable machine-readable code, used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::EmbeddingUnavailable(_) => "embedding_unavailable",
            RetrievalError::DimensionMismatch { .. } => "dimension_mismatch",
            RetrievalError::EmptyQuery => "empty_query",
            RetrievalError::UnembeddableText(_) => "unembeddable_text",
            RetrievalError::RecordNotFound(_) => "record_not_found",
            RetrievalError::InvalidChange(_) => "invalid_change",
            RetrievalError::InvalidChunk(_) => "invalid_chunk",
            RetrievalError::Storage(_) => "internal",
        }
    }
}
