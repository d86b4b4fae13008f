//! Locations Fetcher
//!
//! Storage first: pre-geocoded rows for a title are returned as-is and the
//! geocoding engine is skipped. Stored rows are authoritative once present
//! and are never refreshed from the locations service.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::locations_client::{LocationsError, LocationsSource};
use crate::types::{GeocodedLocation, LocationsOrigin, PlaceRecord, TitleId};

/// Read side of the pre-geocoded location store
#[async_trait]
pub trait GeocodedStore: Send + Sync {
    /// Plottable rows for a title in insertion order; empty on a miss
    async fn geocoded_locations(&self, title_id: &TitleId)
        -> wwf_common::Result<Vec<GeocodedLocation>>;
}

/// Why a title has nothing to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoLocationsReason {
    /// Response carried no filming-locations field (or the title was unknown)
    MissingField,
    /// Field present, list empty
    EmptyList,
}

impl NoLocationsReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoLocationsReason::MissingField => "missing_field",
            NoLocationsReason::EmptyList => "empty_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Final locations from storage
    Stored(Vec<GeocodedLocation>),
    /// Raw places that still need geocoding (never empty)
    External(Vec<PlaceRecord>),
    NoLocations(NoLocationsReason),
}

impl FetchOutcome {
    pub fn origin(&self) -> Option<LocationsOrigin> {
        match self {
            FetchOutcome::Stored(_) => Some(LocationsOrigin::Stored),
            FetchOutcome::External(_) => Some(LocationsOrigin::External),
            FetchOutcome::NoLocations(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    /// Title text reported by the locations service
    pub title: Option<String>,
}

pub struct LocationsFetcher {
    store: Arc<dyn GeocodedStore>,
    source: Arc<dyn LocationsSource>,
}

impl LocationsFetcher {
    pub fn new(store: Arc<dyn GeocodedStore>, source: Arc<dyn LocationsSource>) -> Self {
        Self { store, source }
    }

    pub async fn fetch(&self, title_id: &TitleId) -> Result<FetchResult, LocationsError> {
        match self.store.geocoded_locations(title_id).await {
            Ok(rows) if !rows.is_empty() => {
                info!(title_id = %title_id, rows = rows.len(), "Using stored geocoded locations");
                return Ok(FetchResult {
                    outcome: FetchOutcome::Stored(rows),
                    title: None,
                });
            }
            Ok(_) => debug!(title_id = %title_id, "No stored locations"),
            Err(e) => warn!(title_id = %title_id, "Stored locations read failed, treating as miss: {}", e),
        }

        let page = self.source.filming_locations(title_id).await?;
        let outcome = match page.places {
            None => {
                info!(title_id = %title_id, "Locations service has no filming-locations field");
                FetchOutcome::NoLocations(NoLocationsReason::MissingField)
            }
            Some(places) if places.is_empty() => {
                info!(title_id = %title_id, "Locations service returned an empty list");
                FetchOutcome::NoLocations(NoLocationsReason::EmptyList)
            }
            Some(places) => {
                info!(title_id = %title_id, places = places.len(), "Fetched raw locations");
                FetchOutcome::External(places)
            }
        };

        Ok(FetchResult {
            outcome,
            title: page.title,
        })
    }
}
