//! Process-wide boundary dataset cache
//!
//! Country (admin-0) and region (admin-1) polygons from Natural Earth are
//! fetched on first use and kept for the lifetime of the process. A failed
//! fetch leaves the slot empty so the next caller retries.

use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const COUNTRIES_GEOJSON_URL: &str =
    "https://raw.githubusercontent.com/nvkelso/natural-earth-vector/master/geojson/ne_110m_admin_0_countries.geojson";
const REGIONS_GEOJSON_URL: &str =
    "https://raw.githubusercontent.com/nvkelso/natural-earth-vector/master/geojson/ne_110m_admin_1_states_provinces.geojson";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Short and historical names mapped to the dataset's `NAME` value
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("usa", "United States of America"),
    ("united states", "United States of America"),
    ("u.s.a.", "United States of America"),
    ("uk", "United Kingdom"),
    ("united kingdom", "United Kingdom"),
    ("uae", "United Arab Emirates"),
    ("united arab emirates", "United Arab Emirates"),
    ("drc", "Democratic Republic of the Congo"),
    ("congo", "Democratic Republic of the Congo"),
    ("rov", "Republic of Vietnam"),
    ("ussr", "Russia"),
    ("russia", "Russia"),
];

/// Which naming properties a dataset uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Country,
    Region,
}

impl BoundaryKind {
    fn name_keys(self) -> &'static [&'static str] {
        match self {
            BoundaryKind::Country => &["NAME", "name", "ADMIN"],
            BoundaryKind::Region => &["name", "name_en", "NAME"],
        }
    }
}

/// One GeoJSON feature collection, indexed by normalized feature name
#[derive(Debug)]
pub struct BoundaryDataset {
    kind: BoundaryKind,
    /// (normalized name, feature)
    features: Vec<(String, Value)>,
}

impl BoundaryDataset {
    /// Build from a GeoJSON `FeatureCollection`
    pub fn from_geojson(kind: BoundaryKind, collection: Value) -> Option<Self> {
        let Value::Array(features) = collection.get("features")?.clone() else {
            return None;
        };

        let features = features
            .into_iter()
            .filter_map(|feature| {
                let name = kind
                    .name_keys()
                    .iter()
                    .find_map(|key| {
                        feature
                            .pointer(&format!("/properties/{}", key))
                            .and_then(Value::as_str)
                            .filter(|s| !s.trim().is_empty())
                    })
                    .map(normalize_name)?;
                Some((name, feature))
            })
            .collect();

        Some(Self { kind, features })
    }

    pub fn kind(&self) -> BoundaryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature whose name matches `name`: exact first, then containment
    /// either way. Country queries go through the alias table.
    pub fn find(&self, name: &str) -> Option<&Value> {
        let query = match self.kind {
            BoundaryKind::Country => country_query(name),
            BoundaryKind::Region => normalize_name(name),
        };
        if query.is_empty() {
            return None;
        }

        self.features
            .iter()
            .find(|(feature_name, _)| *feature_name == query)
            .or_else(|| {
                self.features.iter().find(|(feature_name, _)| {
                    feature_name.contains(&query) || query.contains(feature_name.as_str())
                })
            })
            .map(|(_, feature)| feature)
    }
}

/// Lowercase, trimmed, inner whitespace collapsed
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn country_query(raw: &str) -> String {
    let normalized = normalize_name(raw);
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, official)| normalize_name(official))
        .unwrap_or(normalized)
}

/// Lazily loaded, never evicted boundary datasets
pub struct BoundaryCache {
    http_client: Client,
    countries_url: String,
    regions_url: String,
    countries: OnceCell<Arc<BoundaryDataset>>,
    regions: OnceCell<Arc<BoundaryDataset>>,
}

static SHARED: OnceLock<BoundaryCache> = OnceLock::new();

impl BoundaryCache {
    pub fn new(countries_url: impl Into<String>, regions_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            countries_url: countries_url.into(),
            regions_url: regions_url.into(),
            countries: OnceCell::new(),
            regions: OnceCell::new(),
        }
    }

    /// Process-wide instance backed by the Natural Earth datasets
    pub fn shared() -> &'static BoundaryCache {
        SHARED.get_or_init(|| BoundaryCache::new(COUNTRIES_GEOJSON_URL, REGIONS_GEOJSON_URL))
    }

    /// Cache with datasets already in place (no network access)
    pub fn preloaded(countries: BoundaryDataset, regions: BoundaryDataset) -> Self {
        Self {
            http_client: Client::new(),
            countries_url: String::new(),
            regions_url: String::new(),
            countries: OnceCell::new_with(Some(Arc::new(countries))),
            regions: OnceCell::new_with(Some(Arc::new(regions))),
        }
    }

    pub async fn countries(&self) -> Option<Arc<BoundaryDataset>> {
        self.load(&self.countries, &self.countries_url, BoundaryKind::Country)
            .await
    }

    pub async fn regions(&self) -> Option<Arc<BoundaryDataset>> {
        self.load(&self.regions, &self.regions_url, BoundaryKind::Region)
            .await
    }

    async fn fetch(&self, url: &str, kind: BoundaryKind) -> Result<BoundaryDataset, String> {
        let response = self
            .http_client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let dataset = BoundaryDataset::from_geojson(kind, body)
            .ok_or_else(|| "not a feature collection".to_string())?;
        info!(kind = ?kind, features = dataset.len(), "Boundary dataset loaded");
        Ok(dataset)
    }

    async fn load(
        &self,
        cell: &OnceCell<Arc<BoundaryDataset>>,
        url: &str,
        kind: BoundaryKind,
    ) -> Option<Arc<BoundaryDataset>> {
        let result = cell
            .get_or_try_init(|| async { self.fetch(url, kind).await.map(Arc::new) })
            .await;

        match result {
            Ok(dataset) => Some(Arc::clone(dataset)),
            Err(e) => {
                warn!(kind = ?kind, "Failed to load boundary dataset: {}", e);
                None
            }
        }
    }
}
