//! Search history endpoints
//!
//! POST /api/searches, GET /api/searches/recent

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use wwf_common::events::WwfEvent;

use crate::db::search_records::{self, SearchRecord};
use crate::error::{ApiError, ApiResult};
use crate::types::is_title_id;
use crate::AppState;

const DEFAULT_RECENT_LIMIT: u32 = 10;
const MAX_RECENT_LIMIT: u32 = 50;

/// POST /api/searches request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSearchRequest {
    pub movie_id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// POST /api/searches
pub async fn record_search(
    State(state): State<AppState>,
    Json(request): Json<RecordSearchRequest>,
) -> ApiResult<StatusCode> {
    let movie_id = request.movie_id.trim();
    if !is_title_id(movie_id) {
        return Err(ApiError::BadRequest(format!(
            "movieId must be a title id, got '{}'",
            movie_id
        )));
    }

    search_records::record_search(&state.db, movie_id, &request.title).await?;
    state.event_bus.emit_lossy(WwfEvent::SearchRecorded {
        movie_id: movie_id.to_string(),
        title: request.title.trim().chars().take(search_records::MAX_TITLE_CHARS).collect(),
        timestamp: chrono::Utc::now(),
    });

    Ok(StatusCode::CREATED)
}

/// GET /api/searches/recent?limit=N
pub async fn recent_searches(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<SearchRecord>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    Ok(Json(search_records::recent_searches(&state.db, limit).await?))
}

pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/api/searches", post(record_search))
        .route("/api/searches/recent", get(recent_searches))
}
