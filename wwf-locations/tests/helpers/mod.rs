//! Shared stubs for wwf-locations integration tests
//!
//! Every upstream seam (knowledge base, locations service, geocoder, stores)
//! is replaced by an in-process stub so tests never touch the network.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wwf_common::events::EventBus;
use wwf_locations::services::{
    GeocodeError, GeocodeOutcome, GeocodedStore, Geocoder, GeocodingEngine, KnowledgeBase,
    KnowledgeBaseError, KnowledgeEntity, LocationsError, LocationsFetcher, LocationsPage,
    LocationsSource, MapPlanner, PipelineRunner, PlaceResolver, ProgressBroadcaster,
    SearchRecorder, TokenSigner,
};
use wwf_locations::types::{GeocodeHit, GeocodedLocation, PlaceRecord, TitleId};

pub const TEST_SECRET: &str = "integration-test-secret";

// ========================================
// Knowledge base
// ========================================

/// Entities by id; unknown ids are missing
#[derive(Default)]
pub struct StubKnowledgeBase {
    pub entities: HashMap<String, Value>,
    pub labels: HashMap<String, String>,
    /// Shared so tests can read it after the stub moves into a resolver
    pub label_calls: Arc<AtomicUsize>,
}

impl StubKnowledgeBase {
    pub fn with_film(mut self, entity_id: &str, title_id: &str, label: &str) -> Self {
        self.entities.insert(
            entity_id.to_string(),
            json!({
                "labels": { "en": { "value": label } },
                "claims": {
                    "P345": [{ "mainsnak": { "datavalue": { "value": title_id } } }]
                }
            }),
        );
        self
    }

    pub fn with_label(mut self, title_id: &str, label: &str) -> Self {
        self.labels.insert(title_id.to_string(), label.to_string());
        self
    }
}

#[async_trait]
impl KnowledgeBase for StubKnowledgeBase {
    async fn entity(&self, entity_id: &str) -> Result<Option<KnowledgeEntity>, KnowledgeBaseError> {
        Ok(self.entities.get(entity_id).cloned().map(KnowledgeEntity::new))
    }

    async fn title_label(&self, title_id: &TitleId) -> Option<String> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        self.labels.get(title_id.as_str()).cloned()
    }
}

// ========================================
// Locations service
// ========================================

/// Canned responses per title id; unknown titles have no locations field
#[derive(Default)]
pub struct StubLocations {
    pub responses: Mutex<HashMap<String, Result<LocationsPage, LocationsError>>>,
    pub calls: AtomicUsize,
}

impl StubLocations {
    pub fn with_places(self, title_id: &str, title: &str, places: &[&str]) -> Self {
        let page = LocationsPage {
            title: Some(title.to_string()),
            places: Some(
                places
                    .iter()
                    .map(|p| PlaceRecord::new(*p, Some(format!("Scene at {}", p))))
                    .collect(),
            ),
        };
        self.with_response(title_id, Ok(page))
    }

    pub fn with_response(
        self,
        title_id: &str,
        response: Result<LocationsPage, LocationsError>,
    ) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(title_id.to_string(), response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationsSource for StubLocations {
    async fn filming_locations(&self, title_id: &TitleId) -> Result<LocationsPage, LocationsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(title_id.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(LocationsPage::not_found()))
    }
}

// ========================================
// Geocoded store
// ========================================

#[derive(Default)]
pub struct StubStore {
    pub rows: HashMap<String, Vec<GeocodedLocation>>,
}

impl StubStore {
    pub fn with_rows(mut self, title_id: &str, rows: Vec<GeocodedLocation>) -> Self {
        self.rows.insert(title_id.to_string(), rows);
        self
    }
}

#[async_trait]
impl GeocodedStore for StubStore {
    async fn geocoded_locations(
        &self,
        title_id: &TitleId,
    ) -> wwf_common::Result<Vec<GeocodedLocation>> {
        Ok(self.rows.get(title_id.as_str()).cloned().unwrap_or_default())
    }
}

/// A plottable stored row
pub fn stored_row(place: &str, lon: f64, lat: f64) -> GeocodedLocation {
    GeocodedLocation {
        place: place.to_string(),
        desc: format!("Scene at {}", place),
        lon: Some(lon),
        lat: Some(lat),
        bbox: None,
        place_type: Some("amenity".to_string()),
        formatted: place.to_string(),
    }
}

// ========================================
// Geocoder
// ========================================

/// Places containing "Paris" resolve; "TIMEOUT" fails; anything else misses
pub struct StubGeocoder {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub available: bool,
}

impl StubGeocoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            available: true,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, place: &str) -> GeocodeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if !self.available {
            return GeocodeOutcome::TransportError(GeocodeError::NotConfigured);
        }
        if place.contains("Paris") {
            GeocodeOutcome::Found(GeocodeHit {
                lon: 2.2945,
                lat: 48.8584,
                bbox: Some([2.29, 48.85, 2.30, 48.86]),
                place_type: Some("amenity".to_string()),
                formatted: "Eiffel Tower, Paris, France".to_string(),
            })
        } else if place == "TIMEOUT" {
            GeocodeOutcome::TransportError(GeocodeError::Timeout)
        } else if place == "TEAPOT" {
            GeocodeOutcome::TransportError(GeocodeError::Status(418, "I'm a teapot".to_string()))
        } else {
            GeocodeOutcome::NotFound {
                formatted: place.to_string(),
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ========================================
// Search history
// ========================================

#[derive(Default)]
pub struct RecordingSearchLog {
    pub searches: Mutex<Vec<(String, String)>>,
}

impl RecordingSearchLog {
    pub fn recorded(&self) -> Vec<(String, String)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchRecorder for RecordingSearchLog {
    async fn record_search(&self, movie_id: &str, title: &str) -> wwf_common::Result<()> {
        self.searches
            .lock()
            .unwrap()
            .push((movie_id.to_string(), title.to_string()));
        Ok(())
    }
}

// ========================================
// Pipeline assembly
// ========================================

pub struct Harness {
    pub runner: Arc<PipelineRunner>,
    pub event_bus: EventBus,
    pub geocoder: Arc<StubGeocoder>,
    pub locations: Arc<StubLocations>,
    pub searches: Arc<RecordingSearchLog>,
    pub signer: TokenSigner,
}

pub fn harness(
    knowledge_base: StubKnowledgeBase,
    store: StubStore,
    locations: StubLocations,
    geocoder: StubGeocoder,
) -> Harness {
    let event_bus = EventBus::new(256);
    let signer = TokenSigner::new(Some(TEST_SECRET.to_string()), 600);
    let geocoder = Arc::new(geocoder);
    let locations = Arc::new(locations);
    let searches = Arc::new(RecordingSearchLog::default());

    let broadcaster = Arc::new(ProgressBroadcaster::new(event_bus.clone()));
    let resolver = Arc::new(PlaceResolver::new(Arc::new(knowledge_base), signer.clone()));
    let fetcher = Arc::new(LocationsFetcher::new(
        Arc::new(store),
        locations.clone() as Arc<dyn LocationsSource>,
    ));
    let engine = GeocodingEngine::new(
        geocoder.clone() as Arc<dyn Geocoder>,
        Arc::clone(&broadcaster),
        Duration::ZERO,
    );

    let runner = PipelineRunner::new(
        resolver,
        fetcher,
        engine,
        broadcaster,
        MapPlanner::new(35.0),
        event_bus.clone(),
        5,
    )
    .with_search_recorder(searches.clone() as Arc<dyn SearchRecorder>);

    Harness {
        runner: Arc::new(runner),
        event_bus,
        geocoder,
        locations,
        searches,
        signer,
    }
}
