//! Service modules for the filming-locations pipeline
//!
//! Core components, leaves first:
//! - [`place_resolver`]: user-facing id → canonical title id
//! - [`locations_fetcher`]: storage short-circuit, else raw places
//! - [`geocoding_engine`]: sequential geocoding with progress
//! - [`progress_broadcaster`]: observable progress state machine
//! - [`map_planner`]: point / region / country classification
//! - [`pipeline_sessions`]: one pipeline runner per client session
//!
//! Upstream clients and supporting services live alongside.

pub mod boundary_cache;
pub mod geocoder;
pub mod geocoding_engine;
pub mod locations_client;
pub mod locations_fetcher;
pub mod map_planner;
pub mod movie_id;
pub mod pipeline;
pub mod pipeline_sessions;
pub mod place_resolver;
pub mod progress_broadcaster;
pub mod title_token;
pub mod wikidata_client;

pub use boundary_cache::{BoundaryCache, BoundaryDataset, BoundaryKind};
pub use geocoder::{GeoapifyClient, GeocodeError, GeocodeOutcome, Geocoder};
pub use geocoding_engine::GeocodingEngine;
pub use locations_client::{ImdbLocationsClient, LocationsError, LocationsPage, LocationsSource};
pub use locations_fetcher::{FetchOutcome, FetchResult, GeocodedStore, LocationsFetcher, NoLocationsReason};
pub use map_planner::{classify, MapPlan, MapPlanner, RenderClass};
pub use movie_id::{decode_movie_id, encode_movie_id};
pub use pipeline::{ErrorKind, PipelineError, PipelineResult, PipelineRunner, RunReport, SearchRecorder};
pub use pipeline_sessions::{is_valid_session_id, PipelineSessions};
pub use place_resolver::{PlaceResolver, ResolutionError, ResolvedTitle};
pub use progress_broadcaster::{ProgressBroadcaster, ProgressSnapshot, ProgressUpdate, RunTicket, UpdateRejected};
pub use title_token::{TokenError, TokenSigner};
pub use wikidata_client::{KnowledgeBase, KnowledgeBaseError, KnowledgeEntity, TitleMeta, WikidataClient};
