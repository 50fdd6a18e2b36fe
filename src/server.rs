//! HTTP API over the index.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | `{ "query": "...", "top_k": 10 }` → ranked records |
//! | `POST` | `/records/changed` | Apply a record change notification |
//! | `POST` | `/records/{id}/reindex` | Rebuild one record's chunks |
//! | `GET`  | `/records/{id}/chunks` | A record's chunks, in order |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_query", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `empty_query`, `unembeddable_text`, `invalid_change`, `invalid_chunk` | 400 |
//! | `record_not_found` | 404 |
//! | `embedding_unavailable` | 503 |
//! | `dimension_mismatch`, `internal` | 500 |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use archive_search_core::models::{Chunk, IndexState, RecordChange, RecordId};
use archive_search_core::search::SearchHit;
use archive_search_core::store::Store;
use archive_search_core::RetrievalError;

use crate::archive::Archive;
use crate::config::Config;
use crate::indexer::IndexOutcome;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    archive: Arc<Archive>,
}

/// Build the router. Exposed for embedding the API in another server.
pub fn router(config: Arc<Config>, archive: Arc<Archive>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/records/changed", post(handle_record_changed))
        .route("/records/{id}/reindex", post(handle_reindex))
        .route("/records/{id}/chunks", get(handle_chunks))
        .layer(cors)
        .with_state(AppState { config, archive })
}

/// Bind to `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let archive = Arc::new(Archive::open(config).await?);
    let app = router(Arc::new(config.clone()), archive.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Archive search listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    archive.store.close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let status = match &err {
            RetrievalError::EmptyQuery
            | RetrievalError::UnembeddableText(_)
            | RetrievalError::InvalidChange(_)
            | RetrievalError::InvalidChunk(_) => StatusCode::BAD_REQUEST,
            RetrievalError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            RetrievalError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RetrievalError::DimensionMismatch { .. } | RetrievalError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let top_k = state.config.resolve_top_k(req.top_k);
    let results = state.archive.engine.search(&req.query, top_k).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ Record changes ============

/// Raw body so malformed payloads map to `invalid_change` rather than an
/// extractor rejection.
async fn handle_record_changed(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<IndexOutcome>, AppError> {
    let change = RecordChange::from_json(&body)?;
    let outcome = state.archive.indexer.on_record_changed(change).await?;
    Ok(Json(outcome))
}

async fn handle_reindex(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<IndexOutcome>, AppError> {
    let outcome = state.archive.indexer.reindex(record_id).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct ChunksResponse {
    record_id: RecordId,
    state: IndexState,
    chunks: Vec<Chunk>,
}

async fn handle_chunks(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<ChunksResponse>, AppError> {
    let store = &state.archive.store;
    if store.get_record(record_id).await?.is_none() {
        return Err(RetrievalError::RecordNotFound(record_id).into());
    }
    let chunks = store.chunks_for_record(record_id).await?;
    let index_state = state.archive.indexer.state(record_id).await?;
    Ok(Json(ChunksResponse {
        record_id,
        state: index_state,
        chunks,
    }))
}
