use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::PipelineError;
use crate::openai::Embedder;
use crate::pinecone::{QueryMatch, VectorStore};

/// Shared handles for the search surface.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<Database>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/stats", get(stats))
        .with_state(state)
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    matches: Vec<QueryMatch>,
}

/// Embed the query text and return the vector store's nearest chunks with
/// their display metadata. Ranking is entirely the store's nearest-neighbor
/// search.
async fn search(
    State(state): State<ApiState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    if params.q.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query is empty".to_string()));
    }
    let top_k = params.top_k.unwrap_or(10).clamp(1, 50);

    let vectors = state
        .embedder
        .embed(std::slice::from_ref(&params.q))
        .await
        .map_err(upstream_error)?;
    let vector = vectors.into_iter().next().ok_or_else(|| {
        (
            StatusCode::BAD_GATEWAY,
            "embedding service returned no vector".to_string(),
        )
    })?;

    let matches = state
        .store
        .query(&vector, top_k)
        .await
        .map_err(upstream_error)?;
    Ok(Json(SearchResponse {
        query: params.q,
        matches,
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    videos: i64,
    chunks: i64,
    embeddings: i64,
    indexed_vectors: u64,
}

async fn stats(
    State(state): State<ApiState>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let videos = state.db.count_videos().map_err(upstream_error)?;
    let chunks = state.db.count_chunks().map_err(upstream_error)?;
    let embeddings = state.db.count_embeddings().map_err(upstream_error)?;
    let indexed_vectors = state.store.stats().await.map_err(upstream_error)?;
    Ok(Json(StatsResponse {
        videos,
        chunks,
        embeddings,
        indexed_vectors,
    }))
}

fn upstream_error(err: PipelineError) -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, err.to_string())
}
