//! Vector store HTTP service.
//!
//! Exposes the store over JSON HTTP for the ingestion pipeline and for
//! query clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/add` | Insert one record (optional upsert) |
//! | `POST` | `/bulk-add` | Insert many records (optional upsert) |
//! | `POST` | `/search` | Nearest-neighbor search (text or vector) |
//! | `POST` | `/create-index` | (Re)build the vector index |
//! | `POST` | `/build-index` | Alias of `/create-index` |
//! | `POST` | `/query` | Unified search: filter + group results |
//! | `GET`  | `/count` | Row count |
//! | `GET`  | `/health` | Liveness check |
//!
//! # Error Contract
//!
//! All error responses carry a machine-readable code:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "embedding dimension 4 does not match schema dimension 1536" } }
//! ```
//!
//! Codes: `bad_request` (400), `embeddings_disabled` (400),
//! `embedding_failed` (502), `search_unavailable` (503), `internal` (500).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::models::{
    AddRequest, BuildIndexRequest, BulkAddRequest, StoreSearchRequest, StoreSearchResponse,
    UnifiedSearchRequest, UnifiedSearchResponse,
};
use crate::query::postprocess;
use crate::ratelimit::RateLimiter;
use crate::store::{StoreError, VectorStore};
use crate::db;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: VectorStore,
    embedder: Arc<EmbeddingClient>,
}

/// Start the vector store service on the configured bind address.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.store.db_path).await?;
    let store = VectorStore::new(pool, config.store.dims);
    store.migrate().await?;

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        Duration::from_secs(config.rate_limit.window_secs),
    ));
    let embedder = Arc::new(EmbeddingClient::new(
        &config.embedding,
        &config.chunking,
        config.store.dims,
        limiter,
    )?);

    let app = build_router(AppState { store, embedder });

    info!(bind = %config.server.bind, "vector store service listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Split out of [`run_server`] so integration tests can
/// serve the app on an ephemeral port.
pub fn router(store: VectorStore, embedder: Arc<EmbeddingClient>) -> Router {
    build_router(AppState { store, embedder })
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/add", post(handle_add))
        .route("/bulk-add", post(handle_bulk_add))
        .route("/search", post(handle_search))
        .route("/create-index", post(handle_build_index))
        .route("/build-index", post(handle_build_index))
        .route("/query", post(handle_query))
        .route("/count", get(handle_count))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn embeddings_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "embeddings_disabled".to_string(),
        message: "embedding provider is disabled; pass query_embedding instead".to_string(),
    }
}

fn embedding_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "embedding_failed".to_string(),
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => bad_request(msg),
            StoreError::Unavailable(msg) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "search_unavailable".to_string(),
                message: msg,
            },
            StoreError::Fatal(msg) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: msg,
            },
        }
    }
}

// ============ POST /add ============

async fn handle_add(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.add(&req.record, req.upsert).await?;
    Ok(Json(serde_json::json!({ "added": 1 })))
}

// ============ POST /bulk-add ============

async fn handle_bulk_add(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(req): Json<BulkAddRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.records.is_empty() {
        return Err(bad_request("records must not be empty"));
    }
    state.store.bulk_add(&req.records, req.upsert).await?;
    Ok(Json(serde_json::json!({ "added": req.records.len() })))
}

// ============ POST /search ============

async fn handle_search(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(req): Json<StoreSearchRequest>,
) -> Result<Json<StoreSearchResponse>, AppError> {
    let limit = req.limit.unwrap_or(10);
    let query_vec = resolve_query_vector(&state, &req).await?;
    let results = state.store.search(&query_vec, limit).await?;
    Ok(Json(StoreSearchResponse { results }))
}

/// Resolve the query vector: use the precomputed embedding when given,
/// otherwise embed the query text through the provider.
async fn resolve_query_vector(
    state: &AppState,
    req: &StoreSearchRequest,
) -> Result<Vec<f32>, AppError> {
    if let Some(vec) = &req.query_embedding {
        return Ok(vec.clone());
    }

    let query = req
        .query
        .as_deref()
        .ok_or_else(|| bad_request("either query or query_embedding is required"))?;
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !state.embedder.is_enabled() {
        return Err(embeddings_disabled());
    }

    state
        .embedder
        .embed_query(query)
        .await
        .map_err(|e| embedding_failed(e.to_string()))
}

// ============ POST /query ============

async fn handle_query(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(req): Json<UnifiedSearchRequest>,
) -> Result<Json<UnifiedSearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !state.embedder.is_enabled() {
        return Err(embeddings_disabled());
    }

    let query_vec = state
        .embedder
        .embed_query(&req.query)
        .await
        .map_err(|e| embedding_failed(e.to_string()))?;

    // Oversample to leave room for post-filtering.
    let hits = state.store.search(&query_vec, req.limit * 2).await?;
    let response = postprocess(hits, &req.filters, req.limit);
    Ok(Json(response))
}

// ============ POST /create-index, /build-index ============

async fn handle_build_index(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(req): Json<BuildIndexRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.build_index(&req).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "column": req.column,
        "metric": req.metric,
    })))
}

// ============ GET /count ============

async fn handle_count(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.count().await?;
    Ok(Json(serde_json::json!({ "count": count })))
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
