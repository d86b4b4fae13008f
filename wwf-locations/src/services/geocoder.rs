//! Geocoding provider client (Geoapify)
//!
//! One free-text place in, one [`GeocodeOutcome`] out. The outcome is a tagged
//! result: a hit, a "coordinates not found" soft failure, or a transport-level
//! error. None of them are retried.
//!
//! Requests are paced by a `governor` rate limiter and bounded by a hard
//! per-request timeout.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::types::GeocodeHit;

const GEOAPIFY_SEARCH_URL: &str = "https://api.geoapify.com/v1/geocode/search";

/// Transport-level geocoding failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("Geocoding API key not configured")]
    NotConfigured,

    #[error("Geocode request timeout")]
    Timeout,

    #[error("Geocode request failed: {0}")]
    Transport(String),

    #[error("Geocoding provider returned {0}: {1}")]
    Status(u16, String),

    #[error("Failed to parse geocoding response: {0}")]
    Parse(String),
}

/// Result of geocoding one place string
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(GeocodeHit),
    /// Provider answered but had no coordinates for the place
    NotFound { formatted: String },
    TransportError(GeocodeError),
}

impl GeocodeOutcome {
    pub fn hit(&self) -> Option<&GeocodeHit> {
        match self {
            GeocodeOutcome::Found(hit) => Some(hit),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.hit().is_some()
    }
}

/// Geocoding seam used by the engine
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, place: &str) -> GeocodeOutcome;

    /// Whether the provider can be called at all
    fn is_available(&self) -> bool {
        true
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct GeoapifyClient {
    http_client: Client,
    api_key: Option<String>,
    search_url: String,
    timeout: Duration,
    rate_limiter: DirectRateLimiter,
}

impl GeoapifyClient {
    pub fn new(
        api_key: Option<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, GeocodeError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            search_url: GEOAPIFY_SEARCH_URL.to_string(),
            timeout,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Send requests to another search endpoint
    pub fn with_search_url(mut self, search_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self
    }
}

#[async_trait]
impl Geocoder for GeoapifyClient {
    async fn geocode(&self, place: &str) -> GeocodeOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return GeocodeOutcome::TransportError(GeocodeError::NotConfigured);
        };

        self.rate_limiter.until_ready().await;

        let result = self
            .http_client
            .get(&self.search_url)
            .query(&[("text", place), ("apiKey", api_key)])
            .timeout(self.timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return GeocodeOutcome::TransportError(GeocodeError::Timeout)
            }
            Err(e) => return GeocodeOutcome::TransportError(GeocodeError::Transport(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "Geocoding request failed".to_string());
            return GeocodeOutcome::TransportError(GeocodeError::Status(status.as_u16(), message));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return GeocodeOutcome::TransportError(GeocodeError::Timeout)
            }
            Err(e) => return GeocodeOutcome::TransportError(GeocodeError::Parse(e.to_string())),
        };

        let outcome = parse_geocode_response(&body, place);
        debug!(place = %place, found = outcome.is_found(), "Geocoded place");
        outcome
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Read the first feature of a GeoJSON geocoding response
pub fn parse_geocode_response(body: &Value, place: &str) -> GeocodeOutcome {
    let feature = body.pointer("/features/0");
    let coordinates = feature
        .and_then(|f| f.pointer("/geometry/coordinates"))
        .and_then(Value::as_array)
        .filter(|c| c.len() >= 2)
        .and_then(|c| Some((c[0].as_f64()?, c[1].as_f64()?)));

    let (Some(feature), Some((lon, lat))) = (feature, coordinates) else {
        return GeocodeOutcome::NotFound {
            formatted: place.to_string(),
        };
    };

    let bbox = feature
        .get("bbox")
        .and_then(Value::as_array)
        .filter(|b| b.len() >= 4)
        .and_then(|b| Some([b[0].as_f64()?, b[1].as_f64()?, b[2].as_f64()?, b[3].as_f64()?]));

    let property = |name: &str| {
        feature
            .pointer(&format!("/properties/{}", name))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    GeocodeOutcome::Found(GeocodeHit {
        lon,
        lat,
        bbox,
        place_type: property("result_type").or_else(|| property("type")),
        formatted: property("formatted")
            .or_else(|| property("name"))
            .unwrap_or_else(|| place.to_string()),
    })
}
