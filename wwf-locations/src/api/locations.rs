//! Filming-locations lookup
//!
//! GET /api/locations/:id resolves the id and returns either the stored,
//! already geocoded locations or the raw places still to be geocoded. It does
//! not touch the session's pipeline progress.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::services::locations_fetcher::FetchOutcome;
use crate::services::pipeline::PipelineError;
use crate::services::place_resolver::ResolutionError;
use crate::services::wikidata_client::TitleMeta;
use crate::types::LocationsOrigin;
use crate::AppState;

/// GET /api/locations/:id response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResponse {
    pub source: Option<LocationsOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<TitleMeta>,
    /// `GeocodedLocation`s when stored, `PlaceRecord`s when external
    pub locations: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_locations: Option<&'static str>,
    pub runtime_ms: u64,
}

/// GET /api/locations/:id
pub async fn get_locations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let started = Instant::now();
    let resolver = state.sessions.prototype().resolver();

    let resolved = match resolver.resolve(&id).await {
        Ok(resolved) => resolved,
        Err(ResolutionError::NotFound(_)) => {
            return Ok(no_store(LocationsResponse {
                source: None,
                title_id: None,
                title: None,
                meta: None,
                locations: Value::Array(Vec::new()),
                no_locations: Some("no_linked_title"),
                runtime_ms: started.elapsed().as_millis() as u64,
            }));
        }
        Err(ResolutionError::InvalidId(raw)) => {
            return Err(ApiError::BadRequest(format!("Invalid title id '{}'", raw)));
        }
        Err(ResolutionError::Upstream(msg)) => return Err(ApiError::ServiceUnavailable(msg)),
    };

    let fetched = state
        .sessions
        .prototype()
        .fetcher()
        .fetch(&resolved.title_id)
        .await
        .map_err(PipelineError::from)?;

    let source = fetched.outcome.origin();
    let (locations, no_locations) = match fetched.outcome {
        FetchOutcome::Stored(rows) => (to_json(&rows)?, None),
        FetchOutcome::External(places) => (to_json(&places)?, None),
        FetchOutcome::NoLocations(reason) => (Value::Array(Vec::new()), Some(reason.as_str())),
    };

    let title = match resolved.title.or(fetched.title) {
        Some(title) => Some(title),
        None => resolver.title_label(&resolved.title_id).await,
    };

    info!(
        id = %id,
        title_id = %resolved.title_id,
        source = source.map(|s| s.as_str()).unwrap_or("none"),
        "Locations lookup"
    );

    Ok(no_store(LocationsResponse {
        source,
        title_id: Some(resolved.title_id.to_string()),
        title,
        meta: resolved.meta,
        locations,
        no_locations,
        runtime_ms: started.elapsed().as_millis() as u64,
    }))
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

fn no_store(body: LocationsResponse) -> impl IntoResponse {
    ([(header::CACHE_CONTROL, "no-store, max-age=0")], Json(body))
}

pub fn locations_routes() -> Router<AppState> {
    Router::new().route("/api/locations/:id", get(get_locations))
}
