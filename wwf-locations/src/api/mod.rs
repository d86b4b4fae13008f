//! HTTP API handlers for wwf-locations
//!
//! REST endpoints for lookups and pipeline control, plus an SSE stream of
//! pipeline progress.

pub mod geocode;
pub mod health;
pub mod locations;
pub mod pipeline;
pub mod searches;
pub mod sse;
pub mod token;

pub use geocode::geocode_routes;
pub use health::health_routes;
pub use locations::locations_routes;
pub use pipeline::pipeline_routes;
pub use searches::search_routes;
pub use sse::pipeline_event_stream;
pub use token::token_routes;
