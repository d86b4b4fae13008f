//! Filming-locations service client
//!
//! Issues the persisted GraphQL query `TitleFilmingLocationsPaginated` as a
//! GET request against the configured base URL and maps each location edge
//! to a [`PlaceRecord`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::types::{PlaceRecord, TitleId};

const OPERATION_NAME: &str = "TitleFilmingLocationsPaginated";
const PERSISTED_QUERY_HASH: &str =
    "9f2ac963d99baf72b7a108de141901f4caa8c03af2e1a08dfade64db843eff7b";
const AFTER_CURSOR: &str = "bGMwMjkwODcz";
const PAGE_SIZE: u32 = 50;
const LOCALE: &str = "en-US";

/// Locations service failures
///
/// "No data" is not an error; see [`LocationsPage::places`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationsError {
    #[error("Locations service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Locations service rate limited")]
    RateLimited,

    #[error("Locations service error {0}: {1}")]
    Upstream(u16, String),
}

/// One response from the locations service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationsPage {
    /// Title text carried by the response
    pub title: Option<String>,
    /// `None` when the response has no filming-locations field at all,
    /// `Some(vec![])` when the field is present but empty
    pub places: Option<Vec<PlaceRecord>>,
}

impl LocationsPage {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Locations service seam used by the fetcher
#[async_trait]
pub trait LocationsSource: Send + Sync {
    async fn filming_locations(&self, title_id: &TitleId) -> Result<LocationsPage, LocationsError>;
}

/// HTTP client for the GraphQL locations service
pub struct ImdbLocationsClient {
    http_client: Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl ImdbLocationsClient {
    /// `base_url = None` leaves the client unconfigured (every call fails
    /// with `ServiceUnavailable`)
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, LocationsError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| LocationsError::ServiceUnavailable(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn query_params(title_id: &TitleId) -> [(&'static str, String); 3] {
        let variables = json!({
            "after": AFTER_CURSOR,
            "const": title_id.as_str(),
            "first": PAGE_SIZE,
            "isAutoTranslationEnabled": false,
            "locale": LOCALE,
            "originalTitleText": false,
        });
        let extensions = json!({
            "persistedQuery": { "sha256Hash": PERSISTED_QUERY_HASH, "version": 1 },
        });
        [
            ("operationName", OPERATION_NAME.to_string()),
            ("variables", variables.to_string()),
            ("extensions", extensions.to_string()),
        ]
    }
}

#[async_trait]
impl LocationsSource for ImdbLocationsClient {
    async fn filming_locations(&self, title_id: &TitleId) -> Result<LocationsPage, LocationsError> {
        let base_url = self.base_url.as_deref().ok_or_else(|| {
            LocationsError::ServiceUnavailable("Locations service not configured".to_string())
        })?;

        debug!(title_id = %title_id, "Querying locations service");
        let response = self
            .http_client
            .get(format!("{}/", base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .query(&Self::query_params(title_id))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LocationsError::ServiceUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(LocationsError::RateLimited),
            StatusCode::NOT_FOUND => return Ok(LocationsPage::not_found()),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(LocationsError::Upstream(status.as_u16(), body));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LocationsError::Upstream(200, format!("Invalid JSON: {}", e)))?;

        Ok(parse_locations_response(&body))
    }
}

/// Extract title text and place records from a GraphQL response body
pub fn parse_locations_response(body: &Value) -> LocationsPage {
    let Some(title) = body.pointer("/data/title").filter(|t| t.is_object()) else {
        return LocationsPage::not_found();
    };

    let title_text = ["/titleText/text", "/originalTitleText/text"]
        .iter()
        .find_map(|p| title.pointer(p).and_then(Value::as_str))
        .or_else(|| title.get("title").and_then(Value::as_str))
        .or_else(|| title.get("name").and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let Some(filming_locations) = title
        .get("filmingLocations")
        .filter(|f| !f.is_null())
    else {
        return LocationsPage {
            title: title_text,
            places: None,
        };
    };

    let places = filming_locations
        .get("edges")
        .and_then(Value::as_array)
        .map(|edges| edges.iter().filter_map(place_from_edge).collect())
        .unwrap_or_default();

    LocationsPage {
        title: title_text,
        places: Some(places),
    }
}

fn place_from_edge(edge: &Value) -> Option<PlaceRecord> {
    let node = edge.get("node")?;
    let text = node.get("location").and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }
    let scene = node
        .pointer("/displayableProperty/qualifiersInMarkdownList/0/markdown")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(PlaceRecord::new(text, scene))
}
