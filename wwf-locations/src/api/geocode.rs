//! Single-place geocoding
//!
//! GET /api/geocode?place=… answers 200 with coordinates on a hit and 200
//! with null coordinates plus an `error` on a soft failure. A provider HTTP
//! error is passed through with its status.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::geocoder::{GeocodeError, GeocodeOutcome};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    pub place: Option<String>,
}

/// Geocode response; coordinates are null on soft failure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub bbox: Option<[f64; 4]>,
    pub place_type: Option<String>,
    pub formatted: String,
}

impl GeocodeResponse {
    fn soft_failure(place: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            lon: None,
            lat: None,
            bbox: None,
            place_type: None,
            formatted: place.to_string(),
        }
    }
}

/// GET /api/geocode
pub async fn geocode_place(
    State(state): State<AppState>,
    Query(query): Query<GeocodeQuery>,
) -> ApiResult<(StatusCode, Json<GeocodeResponse>)> {
    let place = query
        .place
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Place parameter is required".to_string()))?;

    if !state.geocoder.is_available() {
        return Err(ApiError::ServiceUnavailable(
            "Geocoding API key is not configured".to_string(),
        ));
    }

    let response = match state.geocoder.geocode(place).await {
        GeocodeOutcome::Found(hit) => (
            StatusCode::OK,
            GeocodeResponse {
                error: None,
                lon: Some(hit.lon),
                lat: Some(hit.lat),
                bbox: hit.bbox,
                place_type: hit.place_type,
                formatted: hit.formatted,
            },
        ),
        GeocodeOutcome::NotFound { formatted } => (
            StatusCode::OK,
            GeocodeResponse::soft_failure(&formatted, "Coordinates not found for this place"),
        ),
        GeocodeOutcome::TransportError(GeocodeError::NotConfigured) => {
            return Err(ApiError::ServiceUnavailable(
                "Geocoding API key is not configured".to_string(),
            ));
        }
        GeocodeOutcome::TransportError(GeocodeError::Status(code, message)) => {
            let status = StatusCode::from_u16(code)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, GeocodeResponse::soft_failure(place, message))
        }
        GeocodeOutcome::TransportError(e) => {
            (StatusCode::OK, GeocodeResponse::soft_failure(place, e.to_string()))
        }
    };

    Ok((response.0, Json(response.1)))
}

pub fn geocode_routes() -> Router<AppState> {
    Router::new().route("/api/geocode", get(geocode_place))
}
