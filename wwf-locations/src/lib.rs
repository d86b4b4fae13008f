//! wwf-locations library interface
//!
//! Filming-locations lookup service: resolves a movie id, fetches its
//! filming locations (storage first), geocodes raw places one by one with
//! observable progress, and plans how each location is drawn on a map.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wwf_common::config::get_user_agent;
use wwf_common::events::EventBus;

use crate::config::ServiceConfig;
use crate::services::{
    BoundaryCache, GeoapifyClient, Geocoder, GeocodingEngine, ImdbLocationsClient,
    LocationsFetcher, MapPlanner, PipelineRunner, PipelineSessions, PlaceResolver,
    ProgressBroadcaster, TokenSigner, WikidataClient,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    /// One pipeline runner per client session
    pub sessions: Arc<PipelineSessions>,
    pub geocoder: Arc<dyn Geocoder>,
    pub signer: TokenSigner,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        sessions: Arc<PipelineSessions>,
        geocoder: Arc<dyn Geocoder>,
        signer: TokenSigner,
    ) -> Self {
        Self {
            db,
            event_bus,
            sessions,
            geocoder,
            signer,
            startup_time: Utc::now(),
        }
    }

    /// Wire the production clients, stores and pipeline from configuration
    pub fn from_config(
        config: &ServiceConfig,
        db: SqlitePool,
        event_bus: EventBus,
    ) -> anyhow::Result<Self> {
        let settings = &config.pipeline;
        let signer = TokenSigner::new(config.token_secret.clone(), config.token_ttl_seconds);

        let knowledge_base = WikidataClient::new(
            &get_user_agent(),
            settings.knowledge_base_timeout,
            settings.title_label_timeout,
        )?;
        let locations_client = ImdbLocationsClient::new(
            config.locations_service_base_url.clone(),
            settings.locations_timeout,
        )?;
        let geocoder: Arc<dyn Geocoder> = Arc::new(GeoapifyClient::new(
            config.geoapify_api_key.clone(),
            settings.geocode_timeout,
            settings.geocode_requests_per_second,
        )?);

        let broadcaster = Arc::new(ProgressBroadcaster::new(event_bus.clone()));
        let resolver = Arc::new(PlaceResolver::new(Arc::new(knowledge_base), signer.clone()));
        let fetcher = Arc::new(LocationsFetcher::new(
            Arc::new(db::SqliteGeocodedStore::new(db.clone())),
            Arc::new(locations_client),
        ));
        let engine = GeocodingEngine::new(
            Arc::clone(&geocoder),
            Arc::clone(&broadcaster),
            settings.progress_throttle,
        );

        let pipeline = PipelineRunner::new(
            resolver,
            fetcher,
            engine,
            broadcaster,
            MapPlanner::new(settings.region_radius_km),
            event_bus.clone(),
            settings.no_locations_redirect_secs,
        )
        .with_boundaries(BoundaryCache::shared())
        .with_search_recorder(Arc::new(db::SqliteSearchLog::new(db.clone())));

        let sessions = PipelineSessions::new(Arc::new(pipeline), settings.session_idle_timeout);

        Ok(Self::new(db, event_bus, Arc::new(sessions), geocoder, signer))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::locations_routes())
        .merge(api::geocode_routes())
        .merge(api::pipeline_routes())
        .route("/api/pipeline/events", get(api::pipeline_event_stream))
        .merge(api::search_routes())
        .merge(api::token_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
